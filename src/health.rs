use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    // An unreadable storage root is the one thing that makes this service useless
    let (status, storage) = match state.store.namespace_count().await {
        Ok(count) => (
            "healthy",
            json!({
                "root": state.storage_root.display().to_string(),
                "available": true,
                "active_sessions": count
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Storage root unreadable");
            (
                "degraded",
                json!({
                    "root": state.storage_root.display().to_string(),
                    "available": false,
                    "error": e.to_string()
                }),
            )
        }
    };

    let recorded_jobs = match state.job_log.entries().await {
        Ok(entries) => json!(entries.len()),
        Err(e) => {
            warn!(error = %e, "Job log unreadable");
            serde_json::Value::Null
        }
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": summary(&metrics),
        "storage": storage,
        "generation": {
            "job_log": state.job_log.path().display().to_string(),
            "recorded_jobs": recorded_jobs
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let mut overall = summary(&metrics);
    overall["requests_per_second"] = json!(if uptime_seconds > 0 {
        metrics.request_count as f64 / uptime_seconds as f64
    } else {
        0.0
    });

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": overall,
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "limits": {
            "max_clip_bytes": config.limits.max_clip_bytes,
            "merge_bitrate_kbps": config.merge.bitrate_kbps
        }
    }))
}

fn summary(metrics: &AppMetrics) -> serde_json::Value {
    json!({
        "total_requests": metrics.request_count,
        "total_errors": metrics.error_count,
        "error_rate": if metrics.request_count > 0 {
            metrics.error_count as f64 / metrics.request_count as f64
        } else {
            0.0
        },
        "active_merges": metrics.active_merges,
        "clips_ingested": metrics.clips_ingested,
        "artifacts_delivered": metrics.artifacts_delivered
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{}/status", std::process::id());
        if let Ok(status) = std::fs::read_to_string(path) {
            let field = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_storage() {
        let (state, _temp) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"]["available"], true);
        assert_eq!(body["storage"]["active_sessions"], 0);
        assert_eq!(body["service"]["name"], "session-audio-backend");
        assert_eq!(body["generation"]["recorded_jobs"], 0);
    }

    #[actix_web::test]
    async fn test_health_counts_recorded_jobs() {
        let (state, _temp) = test_state().await;
        state
            .job_log
            .append(&json!({"id": "img-1", "status": "completed"}))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["generation"]["recorded_jobs"], 1);
    }

    #[actix_web::test]
    async fn test_metrics_lists_endpoints() {
        let (state, _temp) = test_state().await;
        state.record_endpoint_request("GET /health", 4, false);
        state.record_clip_ingested();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["overall"]["clips_ingested"], 1);
        assert_eq!(body["endpoints"][0]["endpoint"], "GET /health");
        assert_eq!(body["limits"]["merge_bitrate_kbps"], 128);
    }
}
