//! Prometheus metrics HTTP server.
//!
//! Serves metrics, a liveness probe and a plain-text host table.

use crate::balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Address to bind.
    address: SocketAddr,
    /// Path for metrics endpoint.
    path: String,
    collector: MetricsCollector,
    /// Source of the `/hosts` table.
    balancer: Arc<LoadBalancer>,
}

/// Shared per-connection state.
struct Endpoints {
    path: String,
    collector: MetricsCollector,
    balancer: Arc<LoadBalancer>,
}

impl MetricsServer {
    pub fn new(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
        balancer: Arc<LoadBalancer>,
    ) -> Self {
        Self {
            address,
            path,
            collector,
            balancer,
        }
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(self.address).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, address = %self.address, "failed to bind metrics server");
                return;
            }
        };

        info!(address = %self.address, path = %self.path, "metrics server started");

        let endpoints = Arc::new(Endpoints {
            path: self.path,
            collector: self.collector,
            balancer: self.balancer,
        });

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let endpoints = Arc::clone(&endpoints);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let endpoints = Arc::clone(&endpoints);
                                    async move { Ok::<_, Infallible>(handle_request(&req, &endpoints)) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

/// Route one request.
fn handle_request<B>(req: &Request<B>, endpoints: &Endpoints) -> Response<Full<Bytes>> {
    let path = req.uri().path();
    debug!(path = %path, method = %req.method(), "metrics request");

    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n".to_string());
    }

    if path == endpoints.path {
        // Refresh gauges from live host state.
        endpoints
            .collector
            .observe_hosts(&endpoints.balancer.host_stats());

        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, endpoints.collector.registry()) {
            error!(error = %e, "failed to encode metrics");
            return text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics\n".to_string(),
            );
        }
        let mut response = text(StatusCode::OK, buffer);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
        response
    } else if path == "/health" || path == "/healthz" {
        text(StatusCode::OK, "OK\n".to_string())
    } else if path == "/hosts" {
        text(StatusCode::OK, host_table(&endpoints.balancer))
    } else if path == "/" {
        let body = format!(
            "smartlb metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Liveness\n  /hosts - Host stats\n",
            endpoints.path
        );
        text(StatusCode::OK, body)
    } else {
        text(StatusCode::NOT_FOUND, "Not found\n".to_string())
    }
}

/// One line per host, healthy or not.
fn host_table(balancer: &LoadBalancer) -> String {
    let mut body = String::new();
    for stats in balancer.host_stats() {
        let _ = writeln!(body, "{}", stats);
    }
    body
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
