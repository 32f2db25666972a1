//! Address resolution: attach to a given endpoint or launch a server

use tracing::info;

use crate::endpoint::Endpoint;
use crate::error::HarnessResult;
use crate::lifecycle::Lifecycle;
use crate::server::{self, LaunchedServer, ServerConfig};

#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    pub endpoint: Endpoint,
    /// Present only when the harness launched the server itself
    pub server: Option<LaunchedServer>,
}

pub async fn resolve_endpoint(
    explicit: Option<&str>,
    config: &ServerConfig,
    lifecycle: &Lifecycle,
) -> HarnessResult<ResolvedAddress> {
    if let Some(raw) = explicit {
        let endpoint = Endpoint::parse(raw)?;
        info!("Using existing server at {}", endpoint);
        return Ok(ResolvedAddress {
            endpoint,
            server: None,
        });
    }

    let launched = server::launch(config, lifecycle).await?;
    Ok(ResolvedAddress {
        endpoint: launched.endpoint.clone(),
        server: Some(launched),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[tokio::test]
    async fn test_explicit_endpoint_launches_nothing() {
        let lifecycle = Lifecycle::new();
        let resolved = resolve_endpoint(
            Some("http://localhost:8000/?tkn=abc"),
            &ServerConfig::default(),
            &lifecycle,
        )
        .await
        .unwrap();

        assert_eq!(resolved.endpoint.host(), "localhost:8000");
        assert!(resolved.server.is_none());
        assert_eq!(lifecycle.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_an_error() {
        let lifecycle = Lifecycle::new();
        let result = resolve_endpoint(Some("::nope::"), &ServerConfig::default(), &lifecycle).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_endpoint_and_no_server_path() {
        let lifecycle = Lifecycle::new();
        let err = resolve_endpoint(None, &ServerConfig::default(), &lifecycle)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::MissingEnv(_)));
        assert_eq!(lifecycle.pending(), 0);
    }
}
