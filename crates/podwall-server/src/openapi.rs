//! OpenAPI document for the media server.

use utoipa::OpenApi;

use crate::api;
use podwall_types::{AudioLocator, LiveListeners, LivePlayRequest};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::audio::stream_audio,
        api::audio::audio_info,
        api::audio::audio_info_get,
        api::live::live_play,
        api::health::health
    ),
    components(schemas(
        AudioLocator,
        LiveListeners,
        LivePlayRequest,
        api::health::HealthResponse
    )),
    tags(
        (name = "podwall", description = "Progressive audio media server")
    )
)]
pub struct ApiDoc;
