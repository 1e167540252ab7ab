use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current configuration. The generation API key is never echoed back.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": redacted(&config)
    })))
}

/// Partial update of `limits` and `merge`, e.g. `{"merge": {"bitrate_kbps": 192}}`.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": redacted(&current_config)
    })))
}

fn redacted(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "storage": {
            "root": config.storage.root.display().to_string()
        },
        "fetch": {
            "timeout_secs": config.fetch.timeout_secs
        },
        "limits": {
            "max_clip_bytes": config.limits.max_clip_bytes
        },
        "merge": {
            "bitrate_kbps": config.merge.bitrate_kbps
        },
        "generation": {
            "base_url": config.generation.base_url,
            "api_key_set": !config.generation.api_key.is_empty(),
            "max_attempts": config.generation.max_attempts,
            "timeout_secs": config.generation.timeout_secs,
            "job_log_path": config.generation.job_log_path.display().to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure;
    use crate::state::test_support::test_state_with;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_get_config_hides_api_key() {
        let (state, _temp) = test_state_with(|c| c.generation.api_key = "top-secret".to_string()).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let raw = test::read_body(resp).await;
        assert!(!String::from_utf8_lossy(&raw).contains("top-secret"));

        let body: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(body["config"]["generation"]["api_key_set"], true);
    }

    #[actix_web::test]
    async fn test_update_config() {
        let (state, _temp) = test_state_with(|_| {}).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(serde_json::json!({ "merge": { "bitrate_kbps": 192 } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.get_config().merge.bitrate_kbps, 192);

        let req = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(serde_json::json!({ "merge": { "bitrate_kbps": 100 } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().merge.bitrate_kbps, 192);
    }
}
