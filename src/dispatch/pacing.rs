use std::future::Future;
use std::time::Duration;

use log::trace;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum interval between successive calls to one provider
///
/// This is a floor only; the ledger enforces the ceilings. Waiters queue on
/// the async mutex so concurrent callers are released one interval apart.
pub struct CallPacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the interval since the previous call has elapsed, then claim the slot
    pub async fn wait_turn(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                trace!("Pacing: sleeping {:?}", ready_at - now);
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Run `call` once the pacer allows it
pub async fn with_pacing<F, T>(pacer: &CallPacer, call: F) -> T
where
    F: Future<Output = T>,
{
    pacer.wait_turn().await;
    call.await
}
