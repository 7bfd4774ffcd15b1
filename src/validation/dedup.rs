use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

pub type Fingerprint = [u8; 32];

pub fn fingerprint(body: &[u8], origin: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_bytes());
    hasher.update([0u8]);
    hasher.update(body);
    hasher.finalize().into()
}

/// Remembers request fingerprints for a short window. Entries older than twice
/// the window are swept on every check, so the map never outgrows the traffic
/// of the last few seconds.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    seen: Mutex<HashMap<Fingerprint, Instant>>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records the request and reports whether an identical one from the same
    /// origin arrived within the window.
    pub fn check(&self, body: &[u8], origin: &str) -> bool {
        self.check_at(fingerprint(body, origin), Instant::now())
    }

    fn check_at(&self, key: Fingerprint, now: Instant) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let horizon = self.window * 2;
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < horizon);

        match seen.get(&key) {
            Some(first_seen) if now.duration_since(*first_seen) < self.window => true,
            _ => {
                seen.insert(key, now);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
