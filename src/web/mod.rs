pub mod admin;
pub mod api;
pub mod hls;

use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

/// HTTP surface: stream control API, admin views and HLS file serving
pub fn router(state: SharedState) -> Router {
    let hls_route = format!("{}/:camera_id/:file_name", state.publisher.public_prefix());

    Router::new()
        .route(
            "/api/stream/:camera_id",
            get(api::start_stream).delete(api::stop_stream),
        )
        .route("/api/stream/test", post(api::test_stream))
        .route("/api/streams", get(admin::list_streams))
        .route("/sys/status", get(admin::sys_status))
        .route(&hls_route, get(hls::serve_hls_file))
        .with_state(state)
}
