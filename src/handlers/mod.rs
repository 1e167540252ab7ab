//! HTTP handlers and route table.

pub mod clips;
pub mod config;
pub mod generation;

use actix_web::web;

use crate::error::AppError;
use crate::health;

/// Register every `/api/v1` route plus the root `/health` probe.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .route("/health", web::get().to(health::health_check))
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(config::get_config))
            .route("/config", web::put().to(config::update_config))
            .service(
                web::scope("/sessions/{session_id}")
                    .route("/clips", web::post().to(clips::upload_clip))
                    .route("/clips/url", web::post().to(clips::ingest_clip_url))
                    .route("/merge", web::post().to(clips::merge_session)),
            )
            .route("/generate-image", web::post().to(generation::generate_image))
            .route("/check-status/{image_id}", web::get().to(generation::check_status)),
    );
}
