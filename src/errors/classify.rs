//! Turns upstream failures into messages a person can act on.
//!
//! Upstream error bodies are free text rather than a versioned schema, so the
//! rules below are best-effort pattern matching. Precedence, first match wins:
//!
//! 1. the model cannot take image/audio/video/file input
//! 2. the free variant of a model ended and a paid slug replaces it
//! 3. `No endpoints found for <model>`: the model is unavailable
//! 4. HTTP status (401, 402, 429, 5xx)
//! 5. the upstream's own message, unchanged

use super::{ClassifiedError, ErrorKind, UpstreamError};
use crate::providers::Modality;
use axum::http::StatusCode;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const MAX_PASSTHROUGH_CHARS: usize = 300;

const GENERAL_ALTERNATIVES: &[&str] = &[
    "openai/gpt-4o-mini",
    "anthropic/claude-3.5-haiku",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.3-70b-instruct",
];
const IMAGE_CAPABLE: &[&str] = &[
    "openai/gpt-4o-mini",
    "google/gemini-2.0-flash-001",
    "anthropic/claude-3.5-sonnet",
    "qwen/qwen2.5-vl-72b-instruct",
];
const AUDIO_CAPABLE: &[&str] = &[
    "google/gemini-2.0-flash-001",
    "openai/gpt-4o-audio-preview",
    "google/gemini-1.5-pro",
];
const VIDEO_CAPABLE: &[&str] = &["google/gemini-2.0-flash-001", "google/gemini-1.5-pro"];
const FILE_CAPABLE: &[&str] = &[
    "anthropic/claude-3.5-sonnet",
    "google/gemini-2.0-flash-001",
    "openai/gpt-4o",
];

/// Whole-word modality mentions. Bare "file" and "document" are left out: they
/// show up in ordinary errors ("profile", "see the documentation").
static CAPABILITY_KEYWORDS: LazyLock<Vec<(Modality, Regex)>> = LazyLock::new(|| {
    [
        (Modality::Image, r"\b(?:image input|image_url|images?|vision)\b"),
        (Modality::Audio, r"\b(?:audio input|input_audio|audio)\b"),
        (Modality::Video, r"\b(?:video input|video_url|videos?)\b"),
        (Modality::File, r"\b(?:file input|input_file|file attachments?|pdfs?)\b"),
    ]
    .into_iter()
    .map(|(modality, pattern)| {
        (
            modality,
            Regex::new(pattern).expect("capability pattern is valid"),
        )
    })
    .collect()
});
const REJECTION_PHRASES: &[&str] = &[
    "no endpoints found that support",
    "not support",
    "doesn't support",
    "unsupported",
    "cannot process",
    "can't process",
    "cannot accept",
    "not accept",
    "only supports text",
    "is not multimodal",
];

/// A free marker and an ended marker within the same sentence. Dots inside
/// slugs (`gemini-2.0`) do not end a sentence.
static FREE_TIER_ENDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\bfree\s+(?:tier|period|version|variant)s?\b|:free\b)(?:[^.]|\.\S)*?\b(?:ended|expired|no\s+longer|deprecated|discontinued)\b|\bmigrate\s+to\s+the\s+paid\b",
    )
    .expect("free tier pattern is valid")
});

static MODEL_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9][\w.-]*/[\w.:-]*\w").expect("model slug pattern is valid")
});

pub fn classify(err: &UpstreamError) -> ClassifiedError {
    let parsed: Option<Value> = serde_json::from_str(&err.raw_body).ok();
    let detail = extract_upstream_message(&err.raw_body);
    let haystack = search_text(&err.raw_body, parsed.as_ref(), detail.as_deref());
    let upstream_status =
        StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let Some(modality) = capability_mismatch(&haystack) {
        return ClassifiedError::unsupported(modality, &err.model);
    }

    if is_free_tier_ended(&haystack) {
        let slug = paid_slug(detail.as_deref().unwrap_or(&err.raw_body), &err.model);
        let message = match &slug {
            Some(slug) => format!(
                "Free Tier Ended: The free variant of '{}' is no longer offered. Switch to the \
                 paid model '{}' to keep using it.",
                err.model, slug
            ),
            None => format!(
                "Free Tier Ended: The free variant of '{}' is no longer offered. Switch to its \
                 paid variant or pick another free model.",
                err.model
            ),
        };
        return ClassifiedError::new(ErrorKind::Quota, message)
            .with_suggestions(slug.into_iter().collect());
    }

    if let Some(model) = no_endpoints_model(detail.as_deref().unwrap_or(&err.raw_body)) {
        let model = if model.is_empty() { err.model.clone() } else { model };
        let suggestions = alternatives(GENERAL_ALTERNATIVES, &model);
        let message = format!(
            "Model Unavailable: '{}' has no available providers on the upstream right now. \
             Suggested alternatives: {}.",
            model,
            suggestions.join(", ")
        );
        return ClassifiedError::new(ErrorKind::ModelUnavailable, message)
            .with_suggestions(suggestions);
    }

    let (kind, message) = match err.status {
        401 => (
            ErrorKind::Auth,
            format!(
                "Authentication Failed: The upstream rejected the configured API key ({}). \
                 Update the key in the relay settings.",
                detail_or(detail.as_deref(), "invalid credentials")
            ),
        ),
        402 => (
            ErrorKind::Quota,
            format!(
                "Insufficient Credits: {}. Add credits to your upstream account or choose a \
                 free model (ids ending in ':free').",
                detail_or(detail.as_deref(), "your upstream account is out of credits")
            ),
        ),
        429 => (
            ErrorKind::RateLimit,
            format!(
                "Rate Limited: {}. Tip: free models have low per-minute and daily request \
                 limits; wait a moment and retry, or add credits to raise them.",
                detail_or(detail.as_deref(), "too many requests")
            ),
        ),
        502..=504 => (
            ErrorKind::Network,
            format!(
                "Upstream Unavailable (HTTP {}): {}. Please retry in a few moments.",
                err.status,
                detail_or(detail.as_deref(), "the provider is temporarily unreachable")
            ),
        ),
        500..=599 => (
            ErrorKind::Internal,
            format!(
                "Upstream Error (HTTP {}): {}. Please retry; if it keeps happening, try another \
                 model.",
                err.status,
                detail_or(detail.as_deref(), "the upstream failed to process the request")
            ),
        ),
        400..=499 => (
            ErrorKind::Validation,
            detail.unwrap_or_else(|| {
                format!("The upstream rejected the request (HTTP {}).", err.status)
            }),
        ),
        _ => (
            ErrorKind::Internal,
            detail.unwrap_or_else(|| {
                format!("The upstream request failed (HTTP {}).", err.status)
            }),
        ),
    };

    let status = if upstream_status.is_client_error() || upstream_status.is_server_error() {
        upstream_status
    } else {
        kind.default_status()
    };
    ClassifiedError::new(kind, message).with_status(status)
}

/// Pulls the human-readable message out of an upstream error body. Never
/// returns raw JSON; markup and empty bodies yield `None`.
pub fn extract_upstream_message(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => message_from_value(&value),
        Err(_) if trimmed.starts_with('<') => None,
        Err(_) => Some(truncate(trimmed)),
    }
}

fn message_from_value(value: &Value) -> Option<String> {
    let error = value.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.get("detail").and_then(Value::as_str))
        .map(str::trim)
        .filter(|m| !m.is_empty())?;

    // The aggregator wraps provider failures in a generic message and keeps the
    // provider's own text under error.metadata.raw.
    if message.eq_ignore_ascii_case("provider returned error") {
        if let Some(raw) = error
            .and_then(|e| e.pointer("/metadata/raw"))
            .and_then(Value::as_str)
        {
            if let Some(inner) = extract_upstream_message(raw) {
                return Some(inner);
            }
        }
    }
    Some(truncate(message))
}

fn search_text(raw: &str, parsed: Option<&Value>, detail: Option<&str>) -> String {
    let mut text = detail.unwrap_or_default().to_owned();
    if let Some(raw_meta) = parsed.and_then(|v| v.pointer("/error/metadata/raw")) {
        text.push(' ');
        match raw_meta {
            Value::String(s) => text.push_str(s),
            other => text.push_str(&other.to_string()),
        }
    }
    if parsed.is_none() {
        text.push(' ');
        text.push_str(raw);
    }
    text.to_lowercase()
}

fn capability_mismatch(haystack: &str) -> Option<Modality> {
    if !REJECTION_PHRASES.iter().any(|p| haystack.contains(p)) {
        return None;
    }
    CAPABILITY_KEYWORDS
        .iter()
        .find(|(_, pattern)| pattern.is_match(haystack))
        .map(|(modality, _)| *modality)
}

fn is_free_tier_ended(haystack: &str) -> bool {
    FREE_TIER_ENDED.is_match(haystack)
}

fn paid_slug(message: &str, model: &str) -> Option<String> {
    MODEL_SLUG
        .find_iter(message)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_owned())
        .find(|slug| !slug.ends_with(":free") && slug != model)
        .or_else(|| model.strip_suffix(":free").map(str::to_owned))
}

/// `Some("")` when the pattern matched but no model name followed it.
fn no_endpoints_model(message: &str) -> Option<String> {
    const PATTERN: &str = "no endpoints found for";
    let lower = message.to_ascii_lowercase();
    let start = lower.find(PATTERN)? + PATTERN.len();
    let rest = message.get(start..).unwrap_or_default().trim();
    let model = rest
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(['.', ',', ';'])
        .trim_matches(['\'', '"', '`']);
    Some(model.to_owned())
}

fn detail_or(detail: Option<&str>, fallback: &str) -> String {
    detail
        .map(|d| d.trim_end_matches('.'))
        .filter(|d| !d.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_PASSTHROUGH_CHARS {
        return message.to_owned();
    }
    let mut cut: String = message.chars().take(MAX_PASSTHROUGH_CHARS).collect();
    cut.push('…');
    cut
}

fn alternatives(pool: &[&str], exclude: &str) -> Vec<String> {
    pool.iter()
        .filter(|m| **m != exclude)
        .map(|m| (*m).to_owned())
        .collect()
}

pub fn suggestions_for(modality: Modality, model: &str) -> Vec<String> {
    let pool = match modality {
        Modality::Image => IMAGE_CAPABLE,
        Modality::Audio => AUDIO_CAPABLE,
        Modality::Video => VIDEO_CAPABLE,
        Modality::File => FILE_CAPABLE,
        Modality::Text => GENERAL_ALTERNATIVES,
    };
    alternatives(pool, model)
}

pub fn capability_message(modality: Modality, model: &str) -> String {
    let (title, noun) = match modality {
        Modality::Image => ("Image", "images"),
        Modality::Audio => ("Audio", "audio"),
        Modality::Video => ("Video", "video"),
        Modality::File => ("File", "files or PDFs"),
        Modality::Text => ("Text", "text"),
    };
    format!(
        "{} Input Not Supported: '{}' cannot process {}. Remove the attachment or switch to a \
         model that accepts {}, such as: {}.",
        title,
        model,
        noun,
        noun,
        suggestions_for(modality, model).join(", ")
    )
}
