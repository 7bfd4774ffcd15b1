pub mod buffered;
pub mod streaming;

use crate::{
    errors::{classify, ClassifiedError, ErrorKind, UpstreamError},
    providers::NotificationSink,
};

/// Classifies an upstream failure, logs it, and tells the notification sink
/// when the model turned out to be unavailable.
pub(crate) fn classify_upstream(
    notifier: &dyn NotificationSink,
    upstream: &UpstreamError,
) -> ClassifiedError {
    let classified = classify(upstream);
    tracing::warn!(
        upstream_status = upstream.status,
        kind = ?classified.kind,
        "[Upstream] {}",
        classified.message
    );
    if classified.kind == ErrorKind::ModelUnavailable {
        notifier.notify_model_unavailable(&upstream.model, &upstream.raw_body);
    }
    classified
}
