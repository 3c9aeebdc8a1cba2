//! HTTP ping client.

use crate::config::HealthCheckConfig;
use crate::health::{PingParseError, PingResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::ACCEPT;
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

/// Reasons a single ping can fail.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("invalid ping uri: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    #[error("failed to build ping request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("ping request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read ping response: {0}")]
    Body(#[from] hyper::Error),

    #[error("unexpected ping status: {0}")]
    Status(StatusCode),

    #[error("ping timed out after {0:?}")]
    Timeout(Duration),

    #[error("unparseable ping response: {0}")]
    Parse(#[from] PingParseError),
}

/// Something that can ask a node for the cluster's health.
///
/// The poller is generic over this so tests can script responses.
pub trait HealthProbe: Send + Sync {
    /// Ping `host` and return its status report.
    fn probe(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<PingResponse, HealthCheckError>> + Send;
}

/// Issues `GET {scheme}://{host}[:{port}]{path}` and decodes the `PingList`
/// reply.
#[derive(Clone)]
pub struct HealthCheckClient {
    client: Client<HttpConnector, Empty<Bytes>>,
    scheme: String,
    port: Option<u16>,
    path: String,
    timeout: Duration,
}

impl HealthCheckClient {
    /// Create a client from the poller configuration.
    pub fn new(config: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(config.timeout));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self {
            client,
            scheme: config.scheme.clone(),
            port: config.port,
            path: config.path.clone(),
            timeout: config.timeout,
        }
    }

    /// Ping URI for a host. The configured port is only added when the host
    /// identity doesn't carry one.
    pub fn ping_uri(&self, host: &str) -> Result<Uri, HealthCheckError> {
        let authority = match self.port {
            Some(port) if !has_port(host) => format!("{}:{}", host, port),
            _ => host.to_string(),
        };

        Ok(format!("{}://{}{}", self.scheme, authority, self.path).parse()?)
    }

    /// Ping one host, bounded by the configured timeout.
    pub async fn ping(&self, host: &str) -> Result<PingResponse, HealthCheckError> {
        let uri = self.ping_uri(host)?;
        let request = Request::get(uri)
            .header(ACCEPT, "application/xml")
            .body(Empty::<Bytes>::new())?;

        let body = timeout(self.timeout, async {
            let response = self.client.request(request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(HealthCheckError::Status(status));
            }
            Ok::<Bytes, HealthCheckError>(response.into_body().collect().await?.to_bytes())
        })
        .await
        .map_err(|_| HealthCheckError::Timeout(self.timeout))??;

        debug!(host, bytes = body.len(), "ping response received");
        Ok(PingResponse::from_xml(&body)?)
    }
}

impl HealthProbe for HealthCheckClient {
    fn probe(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<PingResponse, HealthCheckError>> + Send {
        self.ping(host)
    }
}

/// Whether a host identity already names a port ("node:9020", "[::1]:9020").
fn has_port(host: &str) -> bool {
    match host.rfind(':') {
        Some(idx) => {
            let (head, port) = (&host[..idx], &host[idx + 1..]);
            let bracketed_or_plain = head.ends_with(']') || !head.contains(':');
            bracketed_or_plain && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client(port: Option<u16>, timeout: Duration) -> HealthCheckClient {
        let config = HealthCheckConfig {
            port,
            timeout,
            ..HealthCheckConfig::default()
        };
        HealthCheckClient::new(&config)
    }

    /// Serve one canned HTTP response and return the address.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });

        addr.to_string()
    }

    #[test]
    fn test_has_port() {
        assert!(has_port("10.0.0.1:9020"));
        assert!(has_port("[::1]:9020"));
        assert!(!has_port("10.0.0.1"));
        assert!(!has_port("node-1.example.com"));
        assert!(!has_port("::1"));
        assert!(!has_port("node:"));
    }

    #[test]
    fn test_ping_uri() {
        let c = client(Some(9020), Duration::from_secs(1));
        assert_eq!(
            c.ping_uri("10.0.0.1").unwrap().to_string(),
            "http://10.0.0.1:9020/?ping"
        );
        assert_eq!(
            c.ping_uri("10.0.0.1:9021").unwrap().to_string(),
            "http://10.0.0.1:9021/?ping"
        );

        let c = client(None, Duration::from_secs(1));
        assert_eq!(
            c.ping_uri("node-1").unwrap().to_string(),
            "http://node-1/?ping"
        );
    }

    #[test]
    fn test_invalid_host_rejected() {
        let c = client(None, Duration::from_secs(1));
        assert!(matches!(
            c.ping_uri("bad host"),
            Err(HealthCheckError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_success() {
        let addr = serve_once(
            "200 OK",
            "<PingList><PingItem><Name>n1</Name><Status>OK</Status></PingItem></PingList>",
        )
        .await;

        let response = client(None, Duration::from_secs(5)).ping(&addr).await.unwrap();
        assert_eq!(response.items().len(), 1);
        assert!(response.items()[0].status.is_ok());
    }

    #[tokio::test]
    async fn test_ping_bad_status() {
        let addr = serve_once("503 Service Unavailable", "").await;

        let result = client(None, Duration::from_secs(5)).ping(&addr).await;
        assert!(matches!(
            result,
            Err(HealthCheckError::Status(StatusCode::SERVICE_UNAVAILABLE))
        ));
    }

    #[tokio::test]
    async fn test_ping_unparseable_body() {
        let addr = serve_once("200 OK", "pong").await;

        let result = client(None, Duration::from_secs(5)).ping(&addr).await;
        assert!(matches!(result, Err(HealthCheckError::Parse(_))));
    }

    #[tokio::test]
    async fn test_ping_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = client(None, Duration::from_secs(2)).ping(&addr).await;
        assert!(matches!(result, Err(HealthCheckError::Transport(_))));
    }

    #[tokio::test]
    async fn test_ping_timeout() {
        // Accept but never answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let result = client(None, Duration::from_millis(100)).ping(&addr).await;
        assert!(matches!(result, Err(HealthCheckError::Timeout(_))));
    }
}
