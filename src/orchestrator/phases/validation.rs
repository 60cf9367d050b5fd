//! Phase 6: confirm the service answers on its health endpoint.

use std::time::Duration;

use super::PhaseContext;
use crate::error::PhaseError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn execute(ctx: &PhaseContext) -> Result<(), PhaseError> {
    check_health(&ctx.config.health_url()).await
}

/// GET `url` and require a 2xx answer.
///
/// Certificates are not verified: the stack serves the self-signed
/// certificate from phase 5 on a loopback address.
pub async fn check_health(url: &str) -> Result<(), PhaseError> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| PhaseError::Terminal(format!("build HTTP client: {}", e)))?;

    log::info!("[Phase] [HEALTH] GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PhaseError::Transient(format!("health endpoint unreachable: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        log::info!("[Phase] [HEALTH] ✓ {} answered {}", url, status);
        Ok(())
    } else {
        // Still starting, or a proxy in front of it is
        Err(PhaseError::Transient(format!(
            "health endpoint returned {}",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthy_endpoint_passes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        check_health(&format!("{}/health", server.url())).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let err = check_health(&format!("{}/health", server.url()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("503"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = check_health(&format!("http://127.0.0.1:{}/health", port))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
