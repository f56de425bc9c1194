// 单个摄像头的 HTTP 发布端
//
// GET /stream  持续的 multipart 帧序列
// GET /health  存活检查
// GET /stats   统计信息（JSON）

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use common::{
    encode_part, stream_content_type, CameraFeed, HealthResponse, StatsResponse, HEALTH_PATH,
    STATS_PATH, STREAM_PATH,
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::slot::FrameSlot;
use crate::stats::{CameraStats, ClientGuard};

/// 发布端共享状态
#[derive(Clone)]
pub struct PublisherState {
    pub feed: CameraFeed,
    pub slot: FrameSlot,
    pub stats: Arc<CameraStats>,
    /// 取消后所有流结束，便于优雅关闭
    pub shutdown: CancellationToken,
}

pub fn create_router(state: PublisherState) -> Router {
    Router::new()
        .route(STREAM_PATH, get(stream_frames))
        .route(HEALTH_PATH, get(health_check))
        .route(STATS_PATH, get(get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check(State(state): State<PublisherState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(state.feed))
}

async fn get_stats(State(state): State<PublisherState>) -> Json<StatsResponse> {
    Json(state.stats.snapshot(state.feed))
}

/// 一个读取方的会话，释放时记录断开
struct ReaderSession {
    id: Uuid,
    feed: CameraFeed,
    _client: ClientGuard,
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        info!("Reader {} disconnected from {}", self.id, self.feed);
    }
}

async fn stream_frames(State(state): State<PublisherState>) -> Response {
    let session = ReaderSession {
        id: Uuid::new_v4(),
        feed: state.feed,
        _client: state.stats.client_guard(),
    };
    info!(
        "Reader {} connected to {} ({} active)",
        session.id,
        state.feed,
        state.stats.clients()
    );

    let slot = state.slot.clone();
    let shutdown = state.shutdown.clone();

    let frames = async_stream::stream! {
        let _session = session;
        let mut last_sequence = 0u64;

        loop {
            let snapshot = tokio::select! {
                _ = shutdown.cancelled() => break,
                snapshot = slot.wait_newer(last_sequence) => snapshot,
            };
            last_sequence = snapshot.sequence;
            yield Ok::<Bytes, Infallible>(encode_part(snapshot.frame.data()));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream_content_type())
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|e| {
            error!("Failed to build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
