use parley_core::PeerId;
use std::time::Duration;
use tokio::time::Instant;

/// The last reply a room sent to synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub text: String,
    pub target: Option<PeerId>,
    pub at: Instant,
}

impl DispatchRecord {
    pub fn new(text: impl Into<String>, target: Option<PeerId>, at: Instant) -> Self {
        Self {
            text: text.into(),
            target,
            at,
        }
    }

    /// Same text within `cooldown` of this record. The target is not compared.
    pub fn is_duplicate(&self, text: &str, now: Instant, cooldown: Duration) -> bool {
        self.text == text && now.saturating_duration_since(self.at) < cooldown
    }
}
