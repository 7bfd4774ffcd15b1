use super::MAX_BODY_BYTES;
use crate::{
    app_state::AppState,
    errors::ClassifiedError,
    pipeline::{buffered, streaming},
    translate::translate_request,
    utils::data_types::ChatRequest,
    validation::pre_validate,
};
use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};

pub async fn chat_completions(
    State(app): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ClassifiedError> {
    let (parts, body) = req.into_parts();
    let origin = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ClassifiedError::validation(format!("Could not read request body: {}", e)))?;

    let credential = app
        .validator
        .validate(&parts.headers, &body, &origin, app.credentials.as_ref())?;

    let request = parse_request(&body)?;
    pre_validate(&request, app.capabilities.as_ref()).into_result()?;

    tracing::info!(
        "[Chat] {} stream={} messages={}",
        request.model,
        request.stream,
        request.messages.len()
    );

    if request.stream {
        return Ok(streaming::respond(app.clone(), credential, request));
    }
    buffered::respond(&app, &credential, &translate_request(&request)).await
}

fn parse_request(body: &[u8]) -> Result<ChatRequest, ClassifiedError> {
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| ClassifiedError::validation(format!("Invalid JSON body: {}", e)))?;
    if request.model.trim().is_empty() {
        return Err(ClassifiedError::validation("The 'model' field is required."));
    }
    if request.messages.is_empty() {
        return Err(ClassifiedError::validation(
            "The 'messages' field must contain at least one message.",
        ));
    }
    Ok(request)
}
