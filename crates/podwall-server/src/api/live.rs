use actix_web::{HttpResponse, Responder, post, web};

use podwall_types::{LiveListeners, LivePlayRequest, TrackId};

use crate::error::ApiError;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/posts/{id}/live",
    params(
        ("id" = u64, Path, description = "Post id")
    ),
    request_body = LivePlayRequest,
    responses(
        (status = 200, description = "Updated live-listener count", body = LiveListeners),
        (status = 400, description = "Invalid id")
    )
)]
#[post("/posts/{id}/live")]
/// Player telemetry: a listener started or stopped playing a post.
pub async fn live_play(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<LivePlayRequest>,
) -> impl Responder {
    let Ok(track_id) = id.trim().parse::<TrackId>() else {
        return ApiError::BadRequest("Invalid post identifier".to_string()).into_response();
    };
    let listeners = state.record_live(track_id, body.play);
    tracing::debug!(track_id, play = body.play, listeners, "live play update");
    HttpResponse::Ok().json(LiveListeners {
        track_id,
        listeners,
    })
}
