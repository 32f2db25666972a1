//! Navigation URL construction
//!
//! The page is pointed at the server's own href with the workspace (or
//! folder) to open and a JSON payload of `[key, value]` pairs that the
//! in-page test runner reads on startup. Paths are passed as remote URIs
//! addressed through the server host.

use std::path::{Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::{HarnessError, HarnessResult};

/// Scheme the server uses to address files on its own filesystem.
pub const REMOTE_SCHEME: &str = "vscode-remote";

/// Extension of multi-root workspace descriptors.
pub const WORKSPACE_EXTENSION: &str = "code-workspace";

/// What the editor should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTarget {
    Folder(String),
    Workspace(String),
}

impl OpenTarget {
    /// Pick `workspace` for `.code-workspace` files and `folder` for
    /// everything else.
    pub fn for_path(endpoint: &Endpoint, path: &Path) -> HarnessResult<Self> {
        let uri = remote_uri(endpoint, path)?;
        if is_workspace_file(path) {
            Ok(OpenTarget::Workspace(uri))
        } else {
            Ok(OpenTarget::Folder(uri))
        }
    }

    pub fn query_key(&self) -> &'static str {
        match self {
            OpenTarget::Folder(_) => "folder",
            OpenTarget::Workspace(_) => "workspace",
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            OpenTarget::Folder(uri) | OpenTarget::Workspace(uri) => uri,
        }
    }
}

/// Parameters handed to the in-page test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NavigationPayload {
    entries: Vec<(String, String)>,
}

impl NavigationPayload {
    pub fn new(
        endpoint: &Endpoint,
        extension_development_path: Option<&Path>,
        extension_tests_path: Option<&Path>,
        extra: &[(String, String)],
    ) -> HarnessResult<Self> {
        let mut entries = Vec::new();

        if let Some(path) = extension_development_path {
            entries.push((
                "extensionDevelopmentPath".to_string(),
                remote_uri(endpoint, path)?,
            ));
        }
        if let Some(path) = extension_tests_path {
            entries.push(("extensionTestsPath".to_string(), remote_uri(endpoint, path)?));
        }

        entries.push(("enableProposedApi".to_string(), String::new()));
        entries.push(("skipWelcome".to_string(), "true".to_string()));

        for (key, value) in extra {
            entries.retain(|(existing, _)| existing != key);
            entries.push((key.clone(), value.clone()));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_json(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Full URL the page is navigated to.
pub fn navigation_url(
    endpoint: &Endpoint,
    target: &OpenTarget,
    payload: &NavigationPayload,
) -> HarnessResult<Url> {
    let mut url = endpoint.url().clone();
    let payload = payload.to_json()?;
    url.query_pairs_mut()
        .append_pair(target.query_key(), target.uri())
        .append_pair("payload", &payload);
    Ok(url)
}

pub fn is_workspace_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == WORKSPACE_EXTENSION)
        .unwrap_or(false)
}

/// `vscode-remote://<host>/<absolute path>`
pub fn remote_uri(endpoint: &Endpoint, path: &Path) -> HarnessResult<String> {
    let absolute = absolutize(path)?;
    let file_url = Url::from_file_path(&absolute).map_err(|_| {
        HarnessError::Config(format!("cannot express {} as a file URI", absolute.display()))
    })?;
    Ok(format!("{}://{}{}", REMOTE_SCHEME, endpoint.host(), file_url.path()))
}

fn absolutize(path: &Path) -> HarnessResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use test_case::test_case;

    fn endpoint(raw: &str) -> Endpoint {
        Endpoint::parse(raw).unwrap()
    }

    #[test_case("http://127.0.0.1:9999/", "/work/project", "folder" ; "plain folder")]
    #[test_case("http://127.0.0.1:9999/", "/work/multi.code-workspace", "workspace" ; "workspace file")]
    #[test_case("http://localhost:8080/?tkn=abc", "/work/dir.with.dots", "folder" ; "dotted folder")]
    #[test_case("https://example.com/", "/work/a/b/c.code-workspace", "workspace" ; "nested workspace")]
    #[test_case("http://[::1]:3000/", "/work/code-workspace", "folder" ; "name without extension")]
    fn test_exactly_one_open_key(raw_endpoint: &str, path: &str, expected_key: &str) {
        let endpoint = endpoint(raw_endpoint);
        let target = OpenTarget::for_path(&endpoint, Path::new(path)).unwrap();
        let payload = NavigationPayload::new(&endpoint, None, None, &[]).unwrap();
        let url = navigation_url(&endpoint, &target, &payload).unwrap();

        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let folder = keys.iter().filter(|k| *k == "folder").count();
        let workspace = keys.iter().filter(|k| *k == "workspace").count();

        assert_eq!(folder + workspace, 1);
        assert!(keys.iter().any(|k| k == expected_key));
        assert!(keys.iter().any(|k| k == "payload"));
    }

    #[test]
    fn test_remote_uri_uses_endpoint_host() {
        let endpoint = endpoint("http://127.0.0.1:9999/");
        let uri = remote_uri(&endpoint, Path::new("/work/my ext")).unwrap();
        assert_eq!(uri, "vscode-remote://127.0.0.1:9999/work/my%20ext");
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let endpoint = endpoint("http://localhost:8080/?tkn=abc");
        let target = OpenTarget::for_path(&endpoint, Path::new("/work/project")).unwrap();
        let payload = NavigationPayload::new(&endpoint, None, None, &[]).unwrap();
        let url = navigation_url(&endpoint, &target, &payload).unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("tkn".to_string(), "abc".to_string()));
        assert_eq!(
            pairs[1],
            ("folder".to_string(), "vscode-remote://localhost:8080/work/project".to_string())
        );
    }

    #[test]
    fn test_payload_pairs() {
        let endpoint = endpoint("http://127.0.0.1:9999/");
        let payload = NavigationPayload::new(
            &endpoint,
            Some(Path::new("/ext")),
            Some(Path::new("/ext/out/test")),
            &[("skipWelcome".to_string(), "false".to_string())],
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                ["extensionDevelopmentPath", "vscode-remote://127.0.0.1:9999/ext"],
                ["extensionTestsPath", "vscode-remote://127.0.0.1:9999/ext/out/test"],
                ["enableProposedApi", ""],
                ["skipWelcome", "false"]
            ])
        );
        assert_eq!(payload.get("enableProposedApi"), Some(""));
    }

    #[test]
    fn test_relative_paths_resolve_against_cwd() {
        let endpoint = endpoint("http://127.0.0.1:9999/");
        let uri = remote_uri(&endpoint, Path::new("fixtures")).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert!(uri.ends_with("/fixtures"));
        assert!(uri.contains(cwd.file_name().unwrap().to_str().unwrap()));
    }
}
