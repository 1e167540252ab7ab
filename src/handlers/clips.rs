//! # Clip Session Handlers
//!
//! ## Available Endpoints:
//! - `POST /sessions/{session_id}/clips` - Upload a clip (multipart field `file` or `audio`)
//! - `POST /sessions/{session_id}/clips/url` - Ingest a clip from a URL
//! - `POST /sessions/{session_id}/merge` - Merge all clips into one MP3, download it and
//!   delete the session
//!
//! Ingestion answers `201` with the stored clip:
//! ```json
//! {
//!   "status": "success",
//!   "message": "Clip stored",
//!   "session_id": "demo",
//!   "clip": {
//!     "name": "01736953200000000000-3f2a...e1.wav",
//!     "created_at": "2025-01-15T15:00:00Z",
//!     "source": "uploaded",
//!     "original_filename": "take-1.wav",
//!     "content_type": "audio/x-wav"
//!   }
//! }
//! ```
//!
//! The merge response is the artifact itself. Once it has been streamed (or the client
//! disconnected) the session's storage is gone and the id starts over empty.

use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::audio::sniff::{self, PayloadKind};
use crate::error::{AppError, AppResult};
use crate::fetch::{filename_from_url, RemoteFetcher};
use crate::session::{Clip, SessionError, SessionId};
use crate::state::AppState;

/// Multipart field names accepted for uploads.
const UPLOAD_FIELDS: [&str; 2] = ["file", "audio"];

#[derive(Debug, Deserialize)]
pub struct ClipUrlRequest {
    pub url: String,
}

pub async fn upload_clip(
    state: web::Data<AppState>,
    path: web::Path<String>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let session = SessionId::parse(&path.into_inner())?;
    let max_bytes = state.get_config().limits.max_clip_bytes;

    let mut upload: Option<(Vec<u8>, String)> = None;
    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let (field_name, filename) = match field.content_disposition() {
            Some(disposition) => (
                disposition.get_name().unwrap_or_default().to_string(),
                disposition.get_filename().map(|s| s.to_string()),
            ),
            None => continue,
        };

        if upload.is_some() || !UPLOAD_FIELDS.contains(&field_name.as_str()) {
            debug!(field = %field_name, "Ignoring multipart field");
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "File too large: more than {} bytes",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((bytes, filename.unwrap_or_else(|| "upload".to_string())));
    }

    let (bytes, filename) = upload.ok_or_else(|| {
        AppError::ValidationError("No file provided (expected multipart field 'file')".to_string())
    })?;

    let content_type = sniff::validate(&bytes, PayloadKind::Audio)?;
    let clip = state
        .store
        .append_clip(&session, &bytes, &filename, content_type, None)
        .await?;
    state.record_clip_ingested();

    Ok(created(&session, &clip))
}

pub async fn ingest_clip_url(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ClipUrlRequest>,
) -> AppResult<HttpResponse> {
    let session = SessionId::parse(&path.into_inner())?;
    let url = RemoteFetcher::normalize_url(&body.url)?;

    // Reject known sources before spending a download on them
    if state.store.is_known_source(&session, &url).await {
        return Err(SessionError::DuplicateSource {
            session: session.to_string(),
            url,
        }
        .into());
    }

    let max_bytes = state.get_config().limits.max_clip_bytes;
    let bytes = state.fetcher.fetch(&url, max_bytes).await?;
    let content_type = sniff::validate(&bytes, PayloadKind::Audio)?;

    let clip = state
        .store
        .append_clip(&session, &bytes, &filename_from_url(&url), content_type, Some(&url))
        .await?;
    state.record_clip_ingested();
    info!(session_id = %session, url = %url, "Remote clip ingested");

    Ok(created(&session, &clip))
}

pub async fn merge_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session = SessionId::parse(&path.into_inner())?;
    let bitrate_kbps = state.get_config().merge.bitrate_kbps;

    let artifact = {
        let _active = state.track_merge();
        state.lifecycle.merge(&session, bitrate_kbps).await?
    };
    state.record_artifact_delivered();

    let length = artifact.bytes.len() as u64;
    Ok(HttpResponse::Ok()
        .content_type(artifact.content_type())
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(artifact.filename.clone())],
        })
        .insert_header(("X-Clips-Merged", artifact.clips_merged.to_string()))
        .insert_header(("X-Clips-Skipped", artifact.clips_skipped.to_string()))
        .insert_header(("X-Duration-Seconds", format!("{:.3}", artifact.duration_seconds)))
        .no_chunking(length)
        .streaming(artifact.into_body()))
}

fn created(session: &SessionId, clip: &Clip) -> HttpResponse {
    HttpResponse::Created().json(json!({
        "status": "success",
        "message": "Clip stored",
        "session_id": session.as_str(),
        "clip": clip
    }))
}

#[cfg(test)]
mod tests {
    use crate::audio::codec::{self, fixtures::*};
    use crate::audio::sniff::fixtures as sniffed;
    use crate::fetch::test_server;
    use crate::handlers::configure;
    use crate::session::SessionId;
    use crate::state::test_support::test_state;
    use crate::state::AppState;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use std::time::Duration;

    const BOUNDARY: &str = "clip-test-boundary";

    fn multipart(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(session: &str, field: &str, filename: &str, bytes: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri(&format!("/api/v1/sessions/{}/clips", session))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart(field, filename, bytes))
    }

    async fn clip_count(state: &AppState, session: &str) -> usize {
        let session = SessionId::parse(session).unwrap();
        state.store.list_clips(&session).await.map(|c| c.len()).unwrap_or(0)
    }

    async fn wait_for_empty_storage(state: &AppState) {
        for _ in 0..100 {
            if state.store.namespace_count().await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session storage was not reclaimed");
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_upload_then_merge_then_not_found() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("s1", "file", "a.wav", &wav_tone(44100, 0.5)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["clip"]["source"], "uploaded");
        assert_eq!(body["clip"]["original_filename"], "a.wav");

        let resp = test::call_service(&app, upload_request("s1", "audio", "b.wav", &wav_tone(44100, 0.75)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post().uri("/api/v1/sessions/s1/merge").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/mpeg");
        let disposition = resp.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains("s1.mp3"));
        assert_eq!(resp.headers().get("X-Clips-Merged").unwrap(), "2");

        let mp3 = test::read_body(resp).await;
        let decoded = codec::decode_clip(&mp3).unwrap();
        assert!((decoded.duration_seconds() - 1.25).abs() < 0.1);

        wait_for_empty_storage(&state).await;
        let req = test::TestRequest::post().uri("/api/v1/sessions/s1/merge").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.get_metrics_snapshot().artifacts_delivered, 1);
        assert_eq!(state.get_metrics_snapshot().clips_ingested, 2);
    }

    #[actix_web::test]
    async fn test_upload_rejects_non_audio_without_storing() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("s2", "file", "ok.wav", &wav_tone(16000, 0.1)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = test::call_service(&app, upload_request("s2", "file", "cover.png", &sniffed::png()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
        assert!(body["error"]["message"].as_str().unwrap().contains("image/png"));

        assert_eq!(clip_count(&state, "s2").await, 1);
    }

    #[actix_web::test]
    async fn test_upload_without_file_field() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("s3", "notes", "a.wav", &wav_tone(16000, 0.1)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.namespace_count().await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_upload_too_large() {
        let (state, _temp) = crate::state::test_support::test_state_with(|c| c.limits.max_clip_bytes = 64).await;
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("s4", "file", "a.wav", &wav_tone(16000, 0.1)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.namespace_count().await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_invalid_session_id() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post().uri("/api/v1/sessions/..hidden/merge").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_merge_ignores_get() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("s5", "file", "a.wav", &wav_tone(16000, 0.1)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/api/v1/sessions/s5/merge").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(clip_count(&state, "s5").await, 1);
    }

    #[actix_web::test]
    async fn test_merge_unknown_session() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post().uri("/api/v1/sessions/nobody/merge").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
        assert!(body["error"]["message"].as_str().unwrap().contains("nobody"));
    }

    #[actix_web::test]
    async fn test_url_ingest_and_duplicate() {
        let (state, _temp) = test_state().await;
        let app = app!(state);
        let base = test_server::serve(vec![("200 OK", wav_tone(22050, 0.2))]).await;
        let url = format!("{}/remote/take.wav", base);

        let req = test::TestRequest::post()
            .uri("/api/v1/sessions/s5/clips/url")
            .set_json(serde_json::json!({ "url": url }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["clip"]["source"], "fetched");
        assert_eq!(body["clip"]["original_filename"], "take.wav");

        // Served only once: the duplicate must be refused without fetching
        let req = test::TestRequest::post()
            .uri("/api/v1/sessions/s5/clips/url")
            .set_json(serde_json::json!({ "url": url }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "duplicate_source");

        assert_eq!(clip_count(&state, "s5").await, 1);
    }

    #[actix_web::test]
    async fn test_url_ingest_transport_failure() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = test::TestRequest::post()
            .uri("/api/v1/sessions/s6/clips/url")
            .set_json(serde_json::json!({ "url": format!("http://{}/a.mp3", addr) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "transport_error");
        assert_eq!(state.store.namespace_count().await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_url_ingest_rejects_bad_scheme() {
        let (state, _temp) = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/sessions/s7/clips/url")
            .set_json(serde_json::json!({ "url": "ftp://host/a.mp3" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
