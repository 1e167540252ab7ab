use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};

use super::route_template;
use crate::error::AppError;

/// Logs one line when a request arrives and one when it finishes.
///
/// The completion line carries the matched route and, for session routes, the
/// `session_id`, so a session's requests can be followed through the log, and the
/// `AppError` type when a handler failed.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        info!(method = %method, path = %path, remote_addr = %remote_addr, "Request started");

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let request = response.request();
                    let route = route_template(request);
                    let session_id = request.match_info().get("session_id").unwrap_or("-");
                    let status = response.status();
                    let error_type = response
                        .response()
                        .error()
                        .and_then(|e| e.as_error::<AppError>())
                        .map(AppError::error_type)
                        .unwrap_or("-");

                    if status.is_server_error() {
                        warn!(
                            method = %method,
                            route = %route,
                            session_id = %session_id,
                            status = status.as_u16(),
                            error_type = %error_type,
                            duration_ms = %duration_ms,
                            "Request completed with server error"
                        );
                    } else {
                        info!(
                            method = %method,
                            route = %route,
                            session_id = %session_id,
                            status = status.as_u16(),
                            error_type = %error_type,
                            duration_ms = %duration_ms,
                            "Request completed"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        method = %method,
                        path = %path,
                        remote_addr = %remote_addr,
                        duration_ms = %duration_ms,
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}
