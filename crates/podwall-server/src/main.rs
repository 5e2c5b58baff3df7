mod api;
mod catalog;
mod config;
mod error;
mod openapi;
mod range;
mod sources;
mod state;

use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::catalog::TrackCatalog;
use crate::sources::SourceRegistry;
use crate::state::AppState;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(
    name = "podwall-server",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("PODWALL_GIT_SHA"),
        ", ",
        env!("PODWALL_BUILD_DATE"),
        ")"
    )
)]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Server config file (TOML); defaults to config.toml next to the binary
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,podwall_server=info")
        }))
        .init();

    let config_path = config::resolve_config_path(args.config.as_ref())?;
    let cfg = config::ServerConfig::load(&config_path)?;
    let bind = match args.bind {
        Some(addr) => addr,
        None => match config::bind_from_config(&cfg)? {
            Some(addr) => addr,
            None => DEFAULT_BIND.parse()?,
        },
    };
    let public_base_url = config::public_base_url_from_config(&cfg, bind)?;

    let sources = SourceRegistry::from_config(cfg.sources.as_deref().unwrap_or_default())?;
    let catalog = TrackCatalog::from_config(cfg.tracks.as_deref().unwrap_or_default());
    if catalog.is_empty() {
        tracing::warn!("track catalog is empty; every audio request will 404");
    }
    tracing::info!(
        bind = %bind,
        config = %config_path.display(),
        public_base_url = %public_base_url,
        sources = ?sources.names(),
        tracks = catalog.len(),
        "starting podwall-server"
    );

    let state = web::Data::new(AppState::new(catalog, sources, public_base_url));

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec![
                podwall_types::LENGTH_HEADER,
                "content-range",
                "accept-ranges",
            ])
            .max_age(3600);
        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .service(api::stream_audio)
            .service(api::audio_info)
            .service(api::audio_info_get)
            .service(api::live_play)
            .service(api::health::health)
            .service(
                SwaggerUi::new("/docs/{_:.*}").url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
