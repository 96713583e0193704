use chrono::{DateTime, Duration, Utc};

// @struct: Circuit state of one provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderHealth {
    // @field: Non-rate-limit failures since the last success
    pub consecutive_errors: u32,

    // @field: Skipped while set and in the future
    pub disabled_until: Option<DateTime<Utc>>,

    // @field: Credentials rejected; skipped for the process lifetime
    pub permanently_disabled: bool,

    // @field: Last error message, for diagnostics
    pub last_error: Option<String>,
}

impl ProviderHealth {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.permanently_disabled && self.disabled_until.is_none_or(|until| until <= now)
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.disabled_until = None;
    }

    /// Count a failure; returns true when this failure opened the circuit
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
        cool_down: Duration,
        message: &str,
    ) -> bool {
        self.consecutive_errors += 1;
        self.last_error = Some(message.to_string());
        if self.consecutive_errors >= threshold.max(1) {
            self.disabled_until = Some(now + cool_down);
            self.consecutive_errors = 0;
            return true;
        }
        false
    }

    pub fn disable_permanently(&mut self, message: &str) {
        self.permanently_disabled = true;
        self.last_error = Some(message.to_string());
    }
}
