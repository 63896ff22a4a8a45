use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};

const INDEX: &str = "cgroup exporter\n\nMetrics are served at /metrics\n";

async fn metrics(State(registry): State<Arc<Registry>>) -> Response {
    let encoded = tokio::task::spawn_blocking(move || {
        let families = registry.gather();
        let encoder = TextEncoder::new();
        let mut body = Vec::new();
        encoder
            .encode(&families, &mut body)
            .map(|()| (encoder.format_type().to_owned(), body))
    })
    .await;

    match encoded {
        Ok(Ok((content_type, body))) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Ok(Err(err)) => {
            log::error!("Failed to encode metrics: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response()
        }
        Err(err) => {
            log::error!("Metrics collection panicked: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to collect metrics",
            )
                .into_response()
        }
    }
}

async fn index() -> &'static str {
    INDEX
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind `{addr}`: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Serves the metrics of a registry over HTTP.
pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        let router = axum::Router::new()
            .route("/", get(index))
            .route("/metrics", get(metrics))
            .with_state(registry);
        Self { router }
    }

    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Binds `addr` and serves requests until the server fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn listen(self, addr: SocketAddr) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        log::info!("Listening on {}", addr);
        axum::serve(listener, self.router.into_make_service())
            .await
            .map_err(Error::Serve)
    }
}
