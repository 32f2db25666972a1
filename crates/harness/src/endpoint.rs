//! Resolved address of the server under test

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{HarnessError, HarnessResult};

static READY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Web UI available at (\S+)").expect("ready line pattern is valid")
});

/// Network address of the editor server. All navigation and remote URIs
/// derive from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse an explicit endpoint such as `http://localhost:8000/?tkn=abc`.
    pub fn parse(input: &str) -> HarnessResult<Self> {
        let url = Url::parse(input.trim())?;
        if url.host_str().is_none() {
            return Err(HarnessError::Config(format!(
                "endpoint has no host: {}",
                input
            )));
        }
        Ok(Self { url })
    }

    /// Look for the server's ready line in a chunk of its output.
    pub fn from_ready_output(text: &str) -> Option<Self> {
        let captures = READY_LINE.captures(text)?;
        Self::parse(&captures[1]).ok()
    }

    /// `host[:port]`, with the port omitted when it is the scheme default.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_line_yields_host_and_port() {
        let endpoint =
            Endpoint::from_ready_output("Web UI available at http://127.0.0.1:9999/").unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1:9999");
        assert_eq!(endpoint.href(), "http://127.0.0.1:9999/");
    }

    #[test]
    fn test_ready_line_inside_noisy_chunk() {
        let chunk = "*\n* Server bound to 127.0.0.1:8123\nWeb UI available at http://localhost:8123/?tkn=secret\n[info] extension host started\n";
        let endpoint = Endpoint::from_ready_output(chunk).unwrap();
        assert_eq!(endpoint.host(), "localhost:8123");
        assert_eq!(endpoint.url().query(), Some("tkn=secret"));
    }

    #[test]
    fn test_unrelated_output_is_ignored() {
        assert!(Endpoint::from_ready_output("Extension host agent listening on 8000").is_none());
        assert!(Endpoint::from_ready_output("Web UI available at").is_none());
    }

    #[test]
    fn test_default_port_is_omitted() {
        let endpoint = Endpoint::parse("https://example.com/editor").unwrap();
        assert_eq!(endpoint.host(), "example.com");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Endpoint::parse("not a url").is_err());
    }
}
