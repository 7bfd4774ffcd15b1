//! Mapping between the public chat-completion shape and the upstream's.
//!
//! The two APIs share field names and semantics, so requests are mostly passed
//! through. Responses are rebuilt field by field and checked before they leave
//! the relay: a half-populated response is reported as an internal error
//! rather than handed to a client parser.

use crate::{
    errors::{classify, ClassifiedError, UpstreamError},
    utils::data_types::{
        ChatMessage, ChatRequest, ChatResponse, Choice, UpstreamChatResponse,
        CHAT_COMPLETION_CHUNK_OBJECT, CHAT_COMPLETION_OBJECT,
    },
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Request body sent upstream. Borrows from the parsed inbound request.
#[derive(Serialize, Debug)]
pub struct UpstreamChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(flatten)]
    pub extra: &'a Map<String, Value>,
}

pub fn translate_request(request: &ChatRequest) -> UpstreamChatRequest<'_> {
    UpstreamChatRequest {
        model: &request.model,
        messages: &request.messages,
        stream: request.stream,
        // Newer clients send max_completion_tokens; the upstream reads max_tokens.
        max_tokens: request.max_tokens.or(request.max_completion_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        extra: &request.extra,
    }
}

pub fn translate_response(
    upstream: UpstreamChatResponse,
    original_model: &str,
) -> Result<ChatResponse, ClassifiedError> {
    if let Some(error) = upstream.error {
        // Some failures arrive with a 2xx status and an error object in the body.
        return Err(classify(&UpstreamError::from_error_object(
            &error,
            original_model,
        )));
    }

    let id = upstream.id.ok_or_else(|| missing_field("id"))?;
    let created = upstream.created.ok_or_else(|| missing_field("created"))?;
    let upstream_choices = upstream.choices.ok_or_else(|| missing_field("choices"))?;

    let mut choices = Vec::with_capacity(upstream_choices.len());
    for (position, choice) in upstream_choices.into_iter().enumerate() {
        let mut message = choice
            .message
            .ok_or_else(|| missing_field("choices[].message"))?;
        if message.role.as_deref().is_none_or(str::is_empty) {
            message.role = Some("assistant".to_owned());
        }
        choices.push(Choice {
            index: choice.index.unwrap_or(position as u32),
            message,
            finish_reason: choice.finish_reason,
            extra: choice.extra,
        });
    }

    if let Some(upstream_model) = upstream.model.filter(|m| m != original_model) {
        tracing::debug!("[Translate] upstream answered as {}", upstream_model);
    }

    let response = ChatResponse {
        id,
        object: CHAT_COMPLETION_OBJECT.to_owned(),
        created,
        model: original_model.to_owned(),
        choices,
        usage: upstream.usage,
        extra: upstream.extra,
    };
    validate_translated_response(&response)?;
    Ok(response)
}

/// Post-condition for anything serialized back to a non-streaming caller.
pub fn validate_translated_response(response: &ChatResponse) -> Result<(), ClassifiedError> {
    if response.id.trim().is_empty() {
        return Err(missing_field("id"));
    }
    if response.object != CHAT_COMPLETION_OBJECT {
        return Err(ClassifiedError::internal(format!(
            "Incomplete response from upstream: unexpected object type '{}'.",
            response.object
        )));
    }
    if response.created <= 0 {
        return Err(missing_field("created"));
    }
    if response.model.trim().is_empty() {
        return Err(missing_field("model"));
    }
    if response.choices.is_empty() {
        return Err(missing_field("choices"));
    }
    Ok(())
}

/// Brings a parsed upstream stream frame into chunk shape in place.
pub fn normalize_chunk(chunk: &mut Value, model: &str, fallback_id: &str, fallback_created: i64) {
    let Some(object) = chunk.as_object_mut() else {
        return;
    };
    object.insert("model".to_owned(), Value::from(model));
    object.insert(
        "object".to_owned(),
        Value::from(CHAT_COMPLETION_CHUNK_OBJECT),
    );
    if !object.get("id").is_some_and(Value::is_string) {
        object.insert("id".to_owned(), Value::from(fallback_id));
    }
    if !object.get("created").is_some_and(Value::is_i64) {
        object.insert("created".to_owned(), Value::from(fallback_created));
    }
    if !object.get("choices").is_some_and(Value::is_array) {
        object.insert("choices".to_owned(), Value::Array(Vec::new()));
    }
}

fn missing_field(field: &str) -> ClassifiedError {
    ClassifiedError::internal(format!(
        "Incomplete response from upstream: required field '{}' is missing.",
        field
    ))
}
