//! HTTP server for the metrics endpoint

use crate::metrics::SharedReadings;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct AppState {
    readings: SharedReadings,
}

/// Build the router serving `metrics_path` and `/health`
pub fn create_router(readings: SharedReadings, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { readings })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.readings.read().render();
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

pub struct HttpServer {
    readings: SharedReadings,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(readings: SharedReadings, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            readings,
            listen_addr,
            metrics_path,
        }
    }

    /// Serve until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = create_router(self.readings, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.listen_addr))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown.borrow_and_update() {
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server error")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Readings;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use driver::TemperatureSample;
    use tower::ServiceExt;

    fn readings_with(values: &[f32]) -> SharedReadings {
        let readings = Readings::shared();
        {
            let mut table = readings.write();
            table.reset(values.len());
            for (index, &celsius) in values.iter().enumerate() {
                table.record(
                    index,
                    TemperatureSample {
                        celsius,
                        calibration_offset: 0,
                    },
                );
            }
        }
        readings
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(readings_with(&[12.5, 20.0]), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), CONTENT_TYPE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "# HELP temper_temp The temperature measured by a TEMPer USB stick\n\
             # TYPE temper_temp gauge\n\
             temper_temp{stick=\"0\"} 12.500000\n\
             temper_temp{stick=\"1\"} 20.000000\n"
        );
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(Readings::shared(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_rejected() {
        let router = create_router(Readings::shared(), "/metrics");

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(Readings::shared(), "/probe/temper");

        let response = router
            .clone()
            .oneshot(Request::get("/probe/temper").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
