//! HTTP query routes and the WebSocket feed

use crate::broadcast::{EventSink, reply_to};
use crate::cache::{FeedStatus, Snapshot};
use crate::curve::PriceCurve;
use crate::error::{NerveError, Result};
use crate::views::{AnalysisContext, AzView, FeedQuery, HealthReport, RegionSummary, RegionView};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    query: FeedQuery,
    scheduler_running: Arc<AtomicBool>,
}

impl AppState {
    /// Create handler state
    pub fn new(query: FeedQuery, scheduler_running: Arc<AtomicBool>) -> Self {
        Self {
            query,
            scheduler_running,
        }
    }

    fn resolve_region(&self, requested: Option<String>) -> Result<String> {
        match requested {
            Some(id) => Ok(id),
            None => self
                .query
                .regions()
                .first()
                .map(|r| r.id.clone())
                .ok_or_else(|| NerveError::config("no regions configured")),
        }
    }
}

/// Error body returned by the routes
pub struct ApiError(NerveError);

impl From<NerveError> for ApiError {
    fn from(e: NerveError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct RegionParams {
    region_id: Option<String>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/snapshot", get(snapshot))
        .route("/api/region", get(region))
        .route("/api/azs", get(azs))
        .route("/api/regions/summary", get(regions_summary))
        .route("/api/prices/curve", get(price_curve))
        .route("/api/analysis/context", get(analysis_context))
        .route("/ws/feed", get(ws_feed))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let running = state.scheduler_running.load(Ordering::Relaxed);
    Json(state.query.health(running).await)
}

async fn status(State(state): State<AppState>) -> Json<FeedStatus> {
    Json(state.query.status().await)
}

async fn snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.query.snapshot().await)
}

async fn region(
    State(state): State<AppState>,
    Query(params): Query<RegionParams>,
) -> ApiResult<RegionView> {
    let id = state.resolve_region(params.region_id)?;
    Ok(Json(state.query.region(&id).await?))
}

async fn azs(
    State(state): State<AppState>,
    Query(params): Query<RegionParams>,
) -> ApiResult<Vec<AzView>> {
    let id = state.resolve_region(params.region_id)?;
    Ok(Json(state.query.azs(&id).await?))
}

async fn regions_summary(State(state): State<AppState>) -> Json<Vec<RegionSummary>> {
    Json(state.query.summary().await)
}

async fn price_curve(
    State(state): State<AppState>,
    Query(params): Query<RegionParams>,
) -> ApiResult<PriceCurve> {
    let id = state.resolve_region(params.region_id)?;
    Ok(Json(state.query.price_curve(&id).await?))
}

async fn analysis_context(State(state): State<AppState>) -> Json<AnalysisContext> {
    Json(state.query.analysis_context().await)
}

async fn ws_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Write half of a WebSocket, shared between the dispatcher and the reader loop
struct WsSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.sender
            .lock()
            .await
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| NerveError::delivery(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sink = Arc::new(WsSink {
        sender: Mutex::new(sender),
    });

    let broadcaster = state.query.broadcaster().clone();
    let status = state.query.status().await;
    let id = match broadcaster.connect(sink.clone(), status).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Failed to greet subscriber");
            return;
        }
    };

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(reply) = reply_to(text.as_str()) else {
                    debug!(subscriber = %id, "Ignoring client message");
                    continue;
                };
                let sent = match reply.to_text() {
                    Ok(body) => sink.send_text(&body).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    debug!(subscriber = %id, error = %e, "Reply failed");
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    broadcaster.disconnect(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{DEFAULT_SEND_TIMEOUT, EventBroadcaster};
    use crate::cache::SnapshotCache;
    use crate::catalog::default_regions;
    use crate::model::fixtures::{offer, region_snapshot};
    use tokio::sync::oneshot;

    struct TestServer {
        base: String,
        cache: Arc<SnapshotCache>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start() -> TestServer {
        let cache = Arc::new(SnapshotCache::default());
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let query = FeedQuery::new(cache.clone(), default_regions(), broadcaster);
        let state = AppState::new(query, Arc::new(AtomicBool::new(true)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, state, async move {
            stopped.await.ok();
        }));

        TestServer {
            base,
            cache,
            stop,
            task,
        }
    }

    impl TestServer {
        async fn shutdown(self) {
            self.stop.send(()).ok();
            self.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_health_and_status_routes() {
        let server = start().await;
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["scheduler_running"], true);

        let status: FeedStatus = client
            .get(format!("{}/api/status", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.cycle_count, 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_region_is_404() {
        let server = start().await;
        let response = reqwest::get(format!("{}/api/region?region_id=mars-north", server.base))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Unknown region: mars-north");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_region_defaults_to_first_configured() {
        let server = start().await;
        server
            .cache
            .install(
                "francecentral",
                region_snapshot(1, vec![offer("francecentral", "Standard_NC6s_v3", 0.4)]),
            )
            .await;

        let view: RegionView = reqwest::get(format!("{}/api/region", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view.region_id, "francecentral");
        assert_eq!(view.availability_zones.len(), 3);
        assert_eq!(view.availability_zones[0].offers.len(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_curve_and_summary_routes() {
        let server = start().await;

        let curve: PriceCurve = reqwest::get(format!("{}/api/prices/curve?region_id=uksouth", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(curve.data.len(), 24);
        assert_eq!(curve.region_id, "uksouth");

        let summary: Vec<RegionSummary> = reqwest::get(format!("{}/api/regions/summary", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary.len(), 3);

        let azs: Vec<AzView> = reqwest::get(format!("{}/api/azs?region_id=westeurope", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(azs[0].az_id, "we-1");

        server.shutdown().await;
    }
}
