use chrono::{DateTime, Duration, Utc};
use log::debug;
use parking_lot::Mutex;

/// Error and cooldown state of one model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelState {
    pub consecutive_errors: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ModelState {
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

struct RotatorState {
    cursor: usize,
    states: Vec<ModelState>,
}

/// Round-robin model selection within one provider
///
/// Models in cooldown or past the error threshold are skipped. When every
/// candidate is skipped, the one whose cooldown started earliest is forced
/// back into service.
pub struct ModelRotator {
    models: Vec<String>,
    max_errors: u32,
    state: Mutex<RotatorState>,
}

impl ModelRotator {
    pub fn new(models: Vec<String>, max_errors: u32) -> Self {
        let states = vec![ModelState::default(); models.len()];
        Self {
            models,
            max_errors: max_errors.max(1),
            state: Mutex::new(RotatorState { cursor: 0, states }),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Next usable model
    pub fn next_model(&self) -> Option<String> {
        self.next_model_where(Utc::now(), |_| true)
    }

    /// Next usable model among those accepted by `allowed`
    pub fn next_model_where<F>(&self, now: DateTime<Utc>, allowed: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        if self.models.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        let len = self.models.len();
        let mut fallback: Option<usize> = None;

        for offset in 0..len {
            let i = (state.cursor + offset) % len;
            if !allowed(&self.models[i]) {
                continue;
            }
            let model_state = &state.states[i];
            let cooling = model_state.is_cooling(now);
            if !cooling && model_state.consecutive_errors < self.max_errors {
                return Some(self.models[i].clone());
            }
            let is_older = match fallback {
                None => true,
                Some(j) => oldest_first(&state.states[i], &state.states[j]),
            };
            if is_older {
                fallback = Some(i);
            }
        }

        let i = fallback?;
        debug!(
            "All models skipped, forcing retry of {} (cooldown {:?})",
            self.models[i], state.states[i].cooldown_until
        );
        state.states[i] = ModelState::default();
        Some(self.models[i].clone())
    }

    /// Move the cursor past `model` so the next call starts elsewhere
    pub fn advance(&self, model: &str) {
        if let Some(i) = self.index_of(model) {
            let mut state = self.state.lock();
            state.cursor = (i + 1) % self.models.len();
        }
    }

    pub fn record_success(&self, model: &str) {
        if let Some(i) = self.index_of(model) {
            let mut state = self.state.lock();
            state.states[i].consecutive_errors = 0;
            state.states[i].cooldown_until = None;
        }
    }

    /// Returns the model's new error streak
    pub fn record_failure(&self, model: &str) -> u32 {
        match self.index_of(model) {
            Some(i) => {
                let mut state = self.state.lock();
                state.states[i].consecutive_errors += 1;
                state.states[i].consecutive_errors
            }
            None => 0,
        }
    }

    pub fn cool_down(&self, model: &str, until: DateTime<Utc>) {
        if let Some(i) = self.index_of(model) {
            self.state.lock().states[i].cooldown_until = Some(until);
        }
    }

    pub fn cool_down_for(&self, model: &str, seconds: u64) {
        self.cool_down(model, Utc::now() + Duration::seconds(seconds as i64));
    }

    pub fn state(&self, model: &str) -> Option<ModelState> {
        let i = self.index_of(model)?;
        Some(self.state.lock().states[i].clone())
    }

    fn index_of(&self, model: &str) -> Option<usize> {
        self.models.iter().position(|m| m == model)
    }
}

// Models with an older (or no) cooldown instant win; error-only skips count as oldest.
fn oldest_first(candidate: &ModelState, current: &ModelState) -> bool {
    match (candidate.cooldown_until, current.cooldown_until) {
        (None, Some(_)) => true,
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}
