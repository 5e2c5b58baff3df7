//! Audio streaming and locator handlers.

use actix_web::body::SizedStream;
use actix_web::http::{StatusCode, header};
use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use podwall_types::{AudioLocator, LENGTH_HEADER, TrackId};

use crate::error::ApiError;
use crate::range::requested_range;
use crate::state::AppState;

/// Parse a path segment into a track id.
fn parse_track_id(raw: &str) -> Result<TrackId, ApiError> {
    raw.trim()
        .parse::<TrackId>()
        .map_err(|_| ApiError::BadRequest("Invalid post identifier".to_string()))
}

#[utoipa::path(
    get,
    path = "/audio/{id}",
    params(
        ("id" = u64, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "Full audio stream"),
        (status = 206, description = "Partial content"),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Not found")
    )
)]
#[get("/audio/{id}")]
/// Stream a track's audio, honouring a single `Range: bytes=start-end` header.
pub async fn stream_audio(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<String>,
) -> impl Responder {
    let track_id = match parse_track_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let Some(entity) = state.catalog.lookup(track_id) else {
        return ApiError::NotFound(format!("no audio for post {track_id}")).into_response();
    };
    let opened = match state.sources.open(entity).await {
        Ok(opened) => opened,
        Err(err) => {
            tracing::warn!(track_id, error = %err, "audio open failed");
            return ApiError::from(err).into_response();
        }
    };
    let total_len = opened.len;
    let mut reader = opened.reader;

    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let range = requested_range(range_header, total_len);

    let (start, len, status_code) = match range {
        Some(r) => (r.start, r.len(), StatusCode::PARTIAL_CONTENT),
        None => (0, total_len, StatusCode::OK),
    };

    if start > 0 {
        if let Err(err) = reader.seek(std::io::SeekFrom::Start(start)).await {
            tracing::warn!(track_id, start, error = %err, "audio seek failed");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let stream = ReaderStream::new(reader.take(len));
    let body = SizedStream::new(len, stream);

    let mut resp = HttpResponse::build(status_code);
    resp.insert_header((header::ACCEPT_RANGES, "bytes"));
    resp.insert_header((header::CONTENT_TYPE, entity.content_type.clone()));
    resp.insert_header((LENGTH_HEADER, total_len.to_string()));
    if let Some(r) = range {
        resp.insert_header((header::CONTENT_RANGE, r.content_range(total_len)));
    }
    resp.insert_header((header::CONTENT_LENGTH, len.to_string()));
    resp.body(body)
}

fn locate(state: &AppState, raw_id: &str) -> HttpResponse {
    let track_id = match parse_track_id(raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let Some(entity) = state.catalog.lookup(track_id) else {
        return ApiError::NotFound(format!("no audio for post {track_id}")).into_response();
    };
    let locator = if entity.uploading {
        AudioLocator::Uploading
    } else {
        AudioLocator::Ready {
            url: state.audio_url(track_id),
        }
    };
    HttpResponse::Ok().json(locator)
}

#[utoipa::path(
    post,
    path = "/info/{id}",
    params(
        ("id" = u64, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "Stream locator", body = AudioLocator),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Not found")
    )
)]
#[post("/info/{id}")]
/// Resolve a post id to a streamable audio URL.
pub async fn audio_info(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    locate(&state, &id)
}

#[utoipa::path(
    get,
    path = "/info/{id}",
    params(
        ("id" = u64, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "Stream locator", body = AudioLocator),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Not found")
    )
)]
#[get("/info/{id}")]
/// Same as `POST /info/{id}`.
pub async fn audio_info_get(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    locate(&state, &id)
}
