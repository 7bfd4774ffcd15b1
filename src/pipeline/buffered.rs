use super::classify_upstream;
use crate::{
    app_state::AppState,
    errors::{ClassifiedError, UpstreamError},
    translate::{translate_response, UpstreamChatRequest},
    utils::data_types::UpstreamChatResponse,
};
use axum::{
    response::{IntoResponse, Response},
    Json,
};

/// One upstream call, one JSON object back.
pub async fn respond(
    app: &AppState,
    credential: &str,
    request: &UpstreamChatRequest<'_>,
) -> Result<Response, ClassifiedError> {
    let res = app
        .upstream
        .send_chat(credential, request)
        .await
        .map_err(|e| {
            tracing::error!("[Upstream] Error sending request: {}", e);
            ClassifiedError::from_transport(&e)
        })?;

    let status = res.status();
    if !status.is_success() {
        let raw_body = res.text().await.unwrap_or_default();
        return Err(classify_upstream(
            app.notifier.as_ref(),
            &UpstreamError {
                status: status.as_u16(),
                raw_body,
                model: request.model.to_owned(),
            },
        ));
    }

    let body = res.bytes().await.map_err(|e| {
        tracing::error!("[Upstream] Error reading response body: {}", e);
        ClassifiedError::from_transport(&e)
    })?;
    let upstream: UpstreamChatResponse = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(
            "[Upstream] Unparseable response ({} bytes): {}",
            body.len(),
            e
        );
        ClassifiedError::internal(format!(
            "The upstream returned a response that could not be parsed: {}",
            e
        ))
    })?;

    if let Some(error) = upstream.error.as_ref() {
        return Err(classify_upstream(
            app.notifier.as_ref(),
            &UpstreamError::from_error_object(error, request.model),
        ));
    }

    let response = translate_response(upstream, request.model)?;
    tracing::info!(
        "[Chat] {} answered with {} choice(s)",
        response.model,
        response.choices.len()
    );
    Ok(Json(response).into_response())
}
