/*!
 * Provider dispatch.
 *
 * - `ledger`: persisted provider-wide and per-model minute/daily request windows
 * - `rotator`: round-robin model choice with cooldowns
 * - `health`: per-provider circuit breaker
 * - `pacing`: minimum spacing between calls to one provider
 * - `metrics`: explicit metrics sink
 * - `dispatcher`: ties the above into ordered provider fallback
 */

pub mod dispatcher;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod pacing;
pub mod rotator;

pub use dispatcher::{DispatchOutcome, DispatcherOptions, ProviderDispatcher};
pub use health::ProviderHealth;
pub use ledger::{LimitTable, RateLimitLedger, WindowKind};
pub use metrics::{CountingMetrics, Metrics, MetricsSnapshot, NoopMetrics};
pub use pacing::CallPacer;
pub use rotator::{ModelRotator, ModelState};
