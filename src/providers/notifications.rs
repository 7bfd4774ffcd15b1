use super::NotificationSink;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

const MAX_DETAIL_CHARS: usize = 300;

/// Surfaces unavailable models through the log, at most once per model per
/// throttle window.
#[derive(Debug)]
pub struct ThrottledNotifier {
    window: Duration,
    last_notified: Mutex<HashMap<String, Instant>>,
}

impl ThrottledNotifier {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when a notification for `model` should go out at `now`.
    fn should_notify(&self, model: &str, now: Instant) -> bool {
        let mut last = match self.last_notified.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.retain(|_, at| now.duration_since(*at) < self.window);
        if last.contains_key(model) {
            return false;
        }
        last.insert(model.to_owned(), now);
        true
    }
}

impl NotificationSink for ThrottledNotifier {
    fn notify_model_unavailable(&self, model: &str, raw_detail: &str) {
        if !self.should_notify(model, Instant::now()) {
            tracing::debug!("[Notify] {} unavailable (throttled)", model);
            return;
        }
        let detail: String = raw_detail.chars().take(MAX_DETAIL_CHARS).collect();
        tracing::warn!(model, detail = %detail, "[Notify] Model unavailable upstream");
    }
}
