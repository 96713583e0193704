/*!
 * Persistent per-provider and per-(provider, model) request counters.
 *
 * A provider carries provider-wide minute and daily windows for its
 * configured ceilings, and each model carries its own windows on top. A call
 * is allowed only while every window of both levels has room. A window resets lazily: any query made at or
 * after `reset_at` zeroes the count and moves `reset_at` to the next boundary
 * (next whole minute, next UTC midnight).
 *
 * The whole document lives behind one mutex. Every mutation is a single
 * load-mutate-save critical section and the save is an atomic rename, so the
 * file on disk is always a complete document. Disk failures only downgrade
 * the ledger to in-memory bookkeeping.
 *
 * Dispatch reserves a slot before calling a vendor (`try_reserve_at`) and
 * hands it back when the call fails (`release_at`), so concurrent callers
 * can never overrun a window between the check and the count.
 */

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::app_config::{Config, ProviderSettings, RateLimits};
use crate::file_utils::FileManager;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_DAY: i64 = 86_400;

/// Counting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Minute,
    Daily,
}

impl WindowKind {
    /// First boundary strictly after `now`
    pub fn next_boundary(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = match self {
            Self::Minute => SECONDS_PER_MINUTE,
            Self::Daily => SECONDS_PER_DAY,
        };
        let next = (now.timestamp().div_euclid(span) + 1) * span;
        DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now + Duration::seconds(span))
    }

    fn limit_from(self, limits: &RateLimits) -> Option<u32> {
        match self {
            Self::Minute => limits.per_minute,
            Self::Daily => limits.per_day,
        }
    }
}

/// One window's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    pub limit: u32,
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl WindowCounter {
    fn new(kind: WindowKind, limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            count: 0,
            reset_at: kind.next_boundary(now),
        }
    }

    fn apply_reset(&mut self, kind: WindowKind, now: DateTime<Utc>) {
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = kind.next_boundary(now);
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }
}

/// Windows of one model keyed by kind
pub type ModelWindows = BTreeMap<WindowKind, WindowCounter>;

/// Windows of one provider and of its models
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderLedger {
    /// Provider-wide windows shared by every model
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub windows: ModelWindows,
    #[serde(default)]
    pub models: BTreeMap<String, ModelWindows>,
}

/// The persisted document, keyed by provider name
pub type LedgerDocument = BTreeMap<String, ProviderLedger>;

/// Configured limits of one provider
#[derive(Debug, Clone, Default)]
pub struct LimitTable {
    /// Ceilings shared by all models of the provider
    pub provider: RateLimits,
    /// Limits of a model without an override
    pub default: RateLimits,
    pub per_model: BTreeMap<String, RateLimits>,
}

impl LimitTable {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            provider: settings.rate_limits,
            default: settings.rate_limits,
            per_model: settings.model_rate_limits.clone(),
        }
    }

    fn for_model(&self, model: &str) -> RateLimits {
        self.per_model.get(model).copied().unwrap_or(self.default)
    }
}

// @struct: Rate limit bookkeeping shared by all dispatches
pub struct RateLimitLedger {
    path: Option<PathBuf>,
    limits: HashMap<String, LimitTable>,
    state: Mutex<LedgerDocument>,
    persistent: AtomicBool,
}

impl RateLimitLedger {
    /// Ledger backed by `path`; a missing or malformed file starts empty
    pub fn new<P: AsRef<Path>>(path: P, limits: HashMap<String, LimitTable>) -> Self {
        let path = path.as_ref().to_path_buf();
        let document = Self::load(&path);
        Self {
            path: Some(path),
            limits,
            state: Mutex::new(document),
            persistent: AtomicBool::new(true),
        }
    }

    /// Ledger that never touches the disk
    pub fn in_memory(limits: HashMap<String, LimitTable>) -> Self {
        Self {
            path: None,
            limits,
            state: Mutex::new(LedgerDocument::new()),
            persistent: AtomicBool::new(false),
        }
    }

    /// Ledger for every configured provider at the configured location
    pub fn from_config(config: &Config) -> Self {
        let limits = config
            .providers
            .iter()
            .map(|p| (p.name.clone(), LimitTable::from_settings(p)))
            .collect();
        Self::new(config.rate_limits_path(), limits)
    }

    fn load(path: &Path) -> LedgerDocument {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LedgerDocument::new(),
            Err(e) => {
                warn!("Cannot read rate limit ledger {}: {}", path.display(), e);
                return LedgerDocument::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!("Ignoring malformed rate limit ledger {}: {}", path.display(), e);
                LedgerDocument::new()
            }
        }
    }

    /// Whether the ledger still writes to disk
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create the windows of a model; idempotent
    pub fn initialize(&self, provider: &str, model: &str) {
        let mut document = self.state.lock();
        if self.ensure_windows(&mut document, provider, model, Utc::now()) {
            self.persist(&document);
        }
    }

    /// False iff some provider-wide or model window is at its limit
    pub fn may_use(&self, provider: &str, model: &str) -> bool {
        self.may_use_at(provider, model, Utc::now())
    }

    pub fn may_use_at(&self, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        let mut document = self.state.lock();
        self.ensure_windows(&mut document, provider, model, now);
        Self::has_room(&mut document, provider, model, now)
    }

    /// Count one call against every window that still has room
    pub fn record_use(&self, provider: &str, model: &str) {
        self.record_use_at(provider, model, Utc::now())
    }

    pub fn record_use_at(&self, provider: &str, model: &str, now: DateTime<Utc>) {
        let mut document = self.state.lock();
        self.ensure_windows(&mut document, provider, model, now);
        if Self::count_call(&mut document, provider, model, now) {
            debug!("Recorded use of {}/{}", provider, model);
            self.persist(&document);
        }
    }

    /// Check and count one call in a single step; false leaves every window untouched
    pub fn try_reserve(&self, provider: &str, model: &str) -> bool {
        self.try_reserve_at(provider, model, Utc::now())
    }

    pub fn try_reserve_at(&self, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        let mut document = self.state.lock();
        let changed = self.ensure_windows(&mut document, provider, model, now);
        if !Self::has_room(&mut document, provider, model, now) {
            if changed {
                self.persist(&document);
            }
            return false;
        }
        if Self::count_call(&mut document, provider, model, now) || changed {
            debug!("Reserved a call to {}/{}", provider, model);
            self.persist(&document);
        }
        true
    }

    /// Hand back a slot taken by `try_reserve_at(.., reserved_at)` for a call that failed
    ///
    /// Windows that reset since the reservation are left alone.
    pub fn release_at(&self, provider: &str, model: &str, reserved_at: DateTime<Utc>) {
        let mut document = self.state.lock();
        let Some(entry) = document.get_mut(provider) else {
            return;
        };
        let mut changed = Self::uncount(&mut entry.windows, reserved_at);
        if let Some(windows) = entry.models.get_mut(model) {
            changed |= Self::uncount(windows, reserved_at);
        }
        if changed {
            debug!("Released a call to {}/{}", provider, model);
            self.persist(&document);
        }
    }

    /// Consistent copy of the whole document
    pub fn snapshot(&self) -> LedgerDocument {
        self.state.lock().clone()
    }

    /// Windows of one model, if any exist
    pub fn windows(&self, provider: &str, model: &str) -> Option<ModelWindows> {
        self.state
            .lock()
            .get(provider)
            .and_then(|p| p.models.get(model))
            .cloned()
    }

    /// Snapshot rendered as the persisted JSON shape
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Provider-wide windows of one provider
    pub fn provider_windows(&self, provider: &str) -> Option<ModelWindows> {
        self.state.lock().get(provider).map(|p| p.windows.clone())
    }

    fn has_room(document: &mut LedgerDocument, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = document.get_mut(provider) else {
            return true;
        };
        let open = |windows: &mut ModelWindows| {
            windows.iter_mut().all(|(kind, counter)| {
                counter.apply_reset(*kind, now);
                !counter.is_exhausted()
            })
        };
        open(&mut entry.windows) && entry.models.get_mut(model).map_or(true, open)
    }

    // Returns whether any counter moved.
    fn count_call(document: &mut LedgerDocument, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = document.get_mut(provider) else {
            return false;
        };
        let bump = |windows: &mut ModelWindows| {
            let mut moved = false;
            for (kind, counter) in windows.iter_mut() {
                counter.apply_reset(*kind, now);
                if counter.count < counter.limit {
                    counter.count += 1;
                    moved = true;
                }
            }
            moved
        };
        let shared = bump(&mut entry.windows);
        let own = entry.models.get_mut(model).map_or(false, bump);
        shared || own
    }

    fn uncount(windows: &mut ModelWindows, reserved_at: DateTime<Utc>) -> bool {
        let mut moved = false;
        for (kind, counter) in windows.iter_mut() {
            if counter.reset_at == kind.next_boundary(reserved_at) && counter.count > 0 {
                counter.count -= 1;
                moved = true;
            }
        }
        moved
    }

    // Returns whether the document changed.
    fn ensure_windows(
        &self,
        document: &mut LedgerDocument,
        provider: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let (shared, own) = self
            .limits
            .get(provider)
            .map(|table| (table.provider, table.for_model(model)))
            .unwrap_or_default();

        let entry = document.entry(provider.to_string()).or_default();
        let mut changed = Self::sync_windows(&mut entry.windows, shared, now);
        let windows = entry.models.entry(model.to_string()).or_default();
        changed |= Self::sync_windows(windows, own, now);
        changed
    }

    // Bring a window set in line with its configured limits.
    fn sync_windows(windows: &mut ModelWindows, limits: RateLimits, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for kind in [WindowKind::Minute, WindowKind::Daily] {
            match kind.limit_from(&limits) {
                Some(limit) => match windows.get_mut(&kind) {
                    Some(counter) if counter.limit != limit => {
                        counter.limit = limit;
                        counter.count = counter.count.min(limit);
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        windows.insert(kind, WindowCounter::new(kind, limit, now));
                        changed = true;
                    }
                },
                None => {
                    changed |= windows.remove(&kind).is_some();
                }
            }
        }
        changed
    }

    // Called with the state lock held.
    fn persist(&self, document: &LedgerDocument) {
        let Some(path) = &self.path else {
            return;
        };
        if !self.persistent.load(Ordering::Relaxed) {
            return;
        }
        let result = serde_json::to_vec_pretty(document)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| FileManager::write_atomic(path, &bytes));
        if let Err(e) = result {
            warn!(
                "Rate limit ledger {} is now in-memory only: {}",
                path.display(),
                e
            );
            self.persistent.store(false, Ordering::Relaxed);
        }
    }
}
