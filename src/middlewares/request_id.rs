use super::cors::allow_any_origin;
use crate::errors::ClassifiedError;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, time::Instant};
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags the request with a fresh id, runs the rest of the stack inside a span
/// carrying it, and turns a handler panic into a 500 instead of a dropped
/// connection.
pub async fn handle_request_id(req: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let started = Instant::now();
    let mut res = match AssertUnwindSafe(next.run(req).instrument(span.clone()))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            span.in_scope(|| tracing::error!("[Panic] Handler panicked: {}", detail));
            let mut res = ClassifiedError::internal(
                "Internal Error: the relay hit an unexpected problem. Please retry.",
            )
            .into_response();
            // The CORS layer sits inside this one and never saw the response.
            allow_any_origin(res.headers_mut());
            res
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    span.in_scope(|| {
        tracing::info!(
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        )
    });
    res
}
