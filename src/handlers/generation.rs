//! # Image Generation Handlers
//!
//! - `POST /generate-image` - Submit a prompt, returns the job id
//! - `GET /check-status/{image_id}` - Poll a job; finished jobs are written to the job log

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::generation::{self, client::status_of};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

pub async fn generate_image(
    state: web::Data<AppState>,
    body: web::Json<PromptRequest>,
) -> AppResult<HttpResponse> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::ValidationError("prompt must not be empty".to_string()));
    }

    let ticket = state.generation.submit(prompt).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Image generation started.",
        "id": ticket.id,
        "status": ticket.status
    })))
}

pub async fn check_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let image_id = path.into_inner();
    let data = state.generation.status(&image_id).await?;

    match status_of(&data) {
        Some(status) if generation::is_terminal(status) => {
            // The job data is still returned when the log cannot be written
            match state.job_log.append(&data).await {
                Ok(entries) => info!(
                    image_id = %image_id,
                    status = %status,
                    entries,
                    log = %state.job_log.path().display(),
                    "Finished job recorded"
                ),
                Err(e) => warn!(
                    image_id = %image_id,
                    error = %e,
                    log = %state.job_log.path().display(),
                    "Failed to record finished job"
                ),
            }
        }
        Some(_) => {}
        None => warn!(image_id = %image_id, "Job data has no status"),
    }

    Ok(HttpResponse::Ok().json(data))
}

#[cfg(test)]
mod tests {
    use crate::fetch::test_server;
    use crate::handlers::configure;
    use crate::state::test_support::test_state_with;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_generate_image_returns_ticket() {
        let base = test_server::serve(vec![
            ("502 Bad Gateway", b"flaky".to_vec()),
            ("200 OK", br#"{"data":{"id":"img-9","status":"pending"}}"#.to_vec()),
        ])
        .await;
        let (state, _temp) = test_state_with(|c| c.generation.base_url = base).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/generate-image")
            .set_json(serde_json::json!({ "prompt": "boys playing soccer in a park" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Image generation started.");
        assert_eq!(body["id"], "img-9");
        assert_eq!(body["status"], "pending");
    }

    #[actix_web::test]
    async fn test_generate_image_upstream_failure() {
        let base = test_server::serve(vec![
            ("500 Internal Server Error", b"a".to_vec()),
            ("500 Internal Server Error", b"b".to_vec()),
            ("500 Internal Server Error", b"c".to_vec()),
        ])
        .await;
        let (state, _temp) = test_state_with(|c| c.generation.base_url = base).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/generate-image")
            .set_json(serde_json::json!({ "prompt": "a lighthouse" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "upstream_error");
    }

    #[actix_web::test]
    async fn test_empty_prompt_is_rejected() {
        let (state, _temp) = test_state_with(|_| {}).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/generate-image")
            .set_json(serde_json::json!({ "prompt": "   " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_check_status_logs_only_finished_jobs() {
        let base = test_server::serve(vec![
            ("200 OK", br#"{"data":{"id":"img-1","status":"in-progress"}}"#.to_vec()),
            ("200 OK", br#"{"data":{"id":"img-1","status":"completed","url":"https://img/1.png"}}"#.to_vec()),
        ])
        .await;
        let (state, _temp) = test_state_with(|c| c.generation.base_url = base).await;
        let job_log = state.job_log.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/v1/check-status/img-1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "in-progress");
        assert!(job_log.entries().await.unwrap().is_empty());

        let req = test::TestRequest::get().uri("/api/v1/check-status/img-1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "completed");

        let entries = job_log.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["url"], "https://img/1.png");
    }

    #[actix_web::test]
    async fn test_check_status_survives_corrupt_job_log() {
        let base = test_server::serve(vec![(
            "200 OK",
            br#"{"data":{"id":"img-1","status":"completed","url":"https://img/1.png"}}"#.to_vec(),
        )])
        .await;
        let (state, _temp) = test_state_with(|c| c.generation.base_url = base).await;
        std::fs::write(state.job_log.path(), b"{not json").unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/v1/check-status/img-1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["url"], "https://img/1.png");
    }
}
