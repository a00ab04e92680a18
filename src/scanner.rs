//! Decoded-code source: turns raw decoder output into scan events.
//!
//! A camera decoder reports the same code many times per second while it is
//! in view. Identical payloads within the debounce window are dropped.
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CodeDebouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl CodeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Trimmed payload if it should be dispatched, `None` if suppressed.
    pub fn accept(&mut self, raw: &str, now: Instant) -> Option<String> {
        let payload = raw.trim();
        if payload.is_empty() {
            return None;
        }
        if let Some((last, at)) = &self.last {
            if last == payload && now.duration_since(*at) < self.window {
                return None;
            }
        }
        self.last = Some((payload.to_string(), now));
        Some(payload.to_string())
    }
}
