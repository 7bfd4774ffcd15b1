mod capabilities;
mod dedup;

pub use capabilities::{pre_validate, CapabilityCheck};
pub use dedup::{fingerprint, Deduplicator, Fingerprint};

use crate::{errors::ClassifiedError, providers::CredentialStore};
use axum::http::{header, HeaderMap};
use std::time::Duration;

/// Front door for chat requests.
///
/// The caller's bearer token is only checked for presence and shape. The key
/// that actually authenticates upstream comes from the credential store, which
/// keeps transport-level auth separate from billing-level auth: clients that
/// send placeholder tokens still work.
#[derive(Debug)]
pub struct RequestValidator {
    dedup: Deduplicator,
}

impl RequestValidator {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            dedup: Deduplicator::new(dedup_window),
        }
    }

    pub fn validate(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        origin: &str,
        credentials: &dyn CredentialStore,
    ) -> Result<String, ClassifiedError> {
        if self.dedup.check(body, origin) {
            tracing::warn!(origin, "[Dedup] Identical request from the same origin within the window");
        }

        check_bearer(headers)?;

        let credential = credentials.configured_credential();
        if credential.trim().is_empty() {
            return Err(ClassifiedError::auth(
                "No upstream API key is configured. Add your key in the relay settings.",
            ));
        }
        Ok(credential)
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }
}

fn check_bearer(headers: &HeaderMap) -> Result<(), ClassifiedError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(ClassifiedError::auth(
            "Missing Authorization header. Send 'Authorization: Bearer <any token>'.",
        ));
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(ClassifiedError::auth(
            "Malformed Authorization header. Expected 'Bearer <token>'.",
        ));
    }
    Ok(())
}
