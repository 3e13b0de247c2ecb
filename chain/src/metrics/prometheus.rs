//! Prometheus-backed metrics and the `/metrics` HTTP exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Registers a freshly built metric and hands it back, keeping call
/// sites to one line per metric.
fn register<M>(registry: &Registry, metric: M) -> Result<M, prometheus::Error>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    register(registry, IntCounter::with_opts(Opts::new(name, help))?)
}

/// Mining and replication metrics for one peer, updated from the miner,
/// the receive-processor, and the broadcast path.
pub struct NodeMetrics {
    /// Blocks this peer mined and appended to its own chain.
    pub blocks_mined: IntCounter,
    /// Blocks received from other peers, valid or not.
    pub blocks_received: IntCounter,
    /// Blocks discarded by validity, linkage, or semantic rules.
    pub blocks_rejected: IntCounter,
    /// Blocks fanned out to at least one peer.
    pub blocks_broadcast: IntCounter,
    /// Fork resolutions that replaced the local chain.
    pub fork_resolutions: IntCounter,
    /// Current length of the local chain.
    pub chain_height: IntGauge,
    /// Duration of one mining pass (up to K nonces), in seconds.
    pub mining_pass_seconds: Histogram,
}

impl NodeMetrics {
    /// Registers every node metric into `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pass_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ];

        Ok(Self {
            blocks_mined: counter(
                registry,
                "node_blocks_mined_total",
                "Blocks mined and appended locally",
            )?,
            blocks_received: counter(
                registry,
                "node_blocks_received_total",
                "Blocks received from peers",
            )?,
            blocks_rejected: counter(
                registry,
                "node_blocks_rejected_total",
                "Blocks discarded by validity, linkage, or semantic rules",
            )?,
            blocks_broadcast: counter(
                registry,
                "node_blocks_broadcast_total",
                "Mined blocks fanned out to peers",
            )?,
            fork_resolutions: counter(
                registry,
                "node_fork_resolutions_total",
                "Fork resolutions that adopted a remote chain",
            )?,
            chain_height: register(
                registry,
                IntGauge::with_opts(Opts::new(
                    "node_chain_height",
                    "Current length of the local chain",
                ))?,
            )?,
            mining_pass_seconds: register(
                registry,
                Histogram::with_opts(
                    HistogramOpts::new(
                        "node_mining_pass_seconds",
                        "Duration of one mining pass in seconds",
                    )
                    .buckets(pass_buckets),
                )?,
            )?,
        })
    }
}

/// The node's metrics handle: a namespaced registry plus the typed
/// metrics registered into it. Shared between tasks via an [`Arc`].
pub struct MetricsRegistry {
    registry: Registry,
    pub node: NodeMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("pollchain".to_string()), None)?;
        let node = NodeMetrics::register(&registry)?;
        Ok(Self { registry, node })
    }

    /// Renders every registered metric in the Prometheus text
    /// exposition format.
    pub fn encode_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut out = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut out)?;
        Ok(out)
    }
}

/// Serves the metrics endpoint on `addr` until the task is dropped.
///
/// Intended to be spawned onto the runtime by the node when the config
/// names an exporter address; each connection gets its own task.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, remote) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { Ok::<_, std::convert::Infallible>(respond(&metrics, &request)) }
            });

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            if let Err(e) = connection.await {
                tracing::debug!(%remote, "metrics connection error: {e}");
            }
        });
    }
}

/// One response per request: the text exposition for `GET /metrics`,
/// 405 for other methods on that path, 404 anywhere else.
fn respond<B>(metrics: &MetricsRegistry, request: &Request<B>) -> Response<Full<Bytes>> {
    if request.uri().path() != "/metrics" {
        return plain(StatusCode::NOT_FOUND, Bytes::from_static(b"not found"));
    }
    if request.method() != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, Bytes::from_static(b"use GET"));
    }

    match metrics.encode_text() {
        Ok(body) => {
            let mut response = plain(StatusCode::OK, Bytes::from(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            tracing::warn!("metrics encoding failed: {e}");
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(b"encoding error"),
            )
        }
    }
}

fn plain(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_show_up_in_the_text_exposition() {
        let metrics = MetricsRegistry::new().expect("fresh registry");
        metrics.node.blocks_mined.inc();
        metrics.node.chain_height.set(5);
        metrics.node.mining_pass_seconds.observe(0.02);

        let text = String::from_utf8(metrics.encode_text().expect("encode")).expect("utf-8");
        assert!(text.contains("node_blocks_mined_total"));
        assert!(text.contains("node_chain_height"));
        assert!(text.contains("node_mining_pass_seconds"));
    }

    #[test]
    fn registering_twice_into_one_registry_fails() {
        let registry = Registry::new();
        NodeMetrics::register(&registry).expect("first registration");
        assert!(NodeMetrics::register(&registry).is_err());
    }

    #[test]
    fn only_get_metrics_is_served() {
        let metrics = MetricsRegistry::new().expect("fresh registry");

        let request = Request::builder().uri("/nope").body(()).unwrap();
        assert_eq!(respond(&metrics, &request).status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(())
            .unwrap();
        assert_eq!(
            respond(&metrics, &request).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        let request = Request::builder().uri("/metrics").body(()).unwrap();
        let response = respond(&metrics, &request);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }
}
