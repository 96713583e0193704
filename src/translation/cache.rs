/*!
 * Translation caching.
 *
 * Keys are content addressed: a truncated SHA-256 over the sorted
 * `field=value` pairs of source text, target language, provider and mode, so
 * the same request maps to the same key across runs. Entries carry their own
 * expiry; expired entries are dropped lazily on `get` and in bulk by `sweep`.
 *
 * Two backends are provided: an in-memory map and a file-per-entry layout
 * sharded by the first two key characters, with a `metadata.json` index of
 * key to expiry. File writes go through an atomic rename.
 */

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::app_config::{Config, TranslationMode};
use crate::file_utils::FileManager;

const KEY_LENGTH: usize = 32;
const METADATA_FILE: &str = "metadata.json";

/// One cached translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub translation: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Fields a cache key is derived from
#[derive(Debug, Clone)]
pub struct CacheKeyFields<'a> {
    pub source_text: &'a str,
    pub target_language: &'a str,
    /// `None` when any provider may answer
    pub provider: Option<&'a str>,
    pub mode: TranslationMode,
    pub preserve_formatting: bool,
}

/// Storage behind the cache; must tolerate concurrent callers
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;

    fn set(&self, entry: CacheEntry);

    fn remove(&self, key: &str);

    /// Remove every entry expired at `now`; returns how many were removed
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, entry: CacheEntry) {
        self.entries.write().insert(entry.key.clone(), entry);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// File-per-entry backend: `<root>/<key[..2]>/<key>.json` plus `<root>/metadata.json`
#[derive(Debug)]
pub struct FileCacheBackend {
    root: PathBuf,
    // key -> expires_at
    metadata: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl FileCacheBackend {
    /// Open or create a cache rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        FileManager::ensure_dir(&root)?;
        let metadata = Self::load_metadata(&root.join(METADATA_FILE));
        Ok(Self {
            root,
            metadata: Mutex::new(metadata),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the entry file for `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let shard: String = key.chars().take(2).collect();
        self.root.join(shard).join(format!("{}.json", key))
    }

    fn load_metadata(path: &Path) -> BTreeMap<String, DateTime<Utc>> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring corrupt cache index {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn save_metadata(&self, metadata: &BTreeMap<String, DateTime<Utc>>) {
        let path = self.root.join(METADATA_FILE);
        let result = serde_json::to_vec_pretty(metadata)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| FileManager::write_atomic(&path, &bytes));
        if let Err(e) = result {
            warn!("Failed to write cache index {}: {}", path.display(), e);
        }
    }

    fn read_entry(path: &Path) -> Option<CacheEntry> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Dropping corrupt cache entry {}: {}", path.display(), e);
                let _ = std::fs::remove_file(path);
                None
            }
        }
    }
}

impl CacheBackend for FileCacheBackend {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = Self::read_entry(&self.entry_path(key))?;
        (entry.key == key).then_some(entry)
    }

    fn set(&self, entry: CacheEntry) {
        let path = self.entry_path(&entry.key);
        let result = serde_json::to_vec(&entry)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| FileManager::write_atomic(&path, &bytes));
        if let Err(e) = result {
            warn!("Failed to write cache entry {}: {}", path.display(), e);
            return;
        }
        let mut metadata = self.metadata.lock();
        metadata.insert(entry.key, entry.expires_at);
        self.save_metadata(&metadata);
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.entry_path(key));
        let mut metadata = self.metadata.lock();
        if metadata.remove(key).is_some() {
            self.save_metadata(&metadata);
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut metadata = self.metadata.lock();
        let mut removed = 0;

        // Entry files are the source of truth; the index is rebuilt from them.
        let mut rebuilt = BTreeMap::new();
        for file in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entry(path) {
                Some(entry) if !entry.is_expired(now) => {
                    rebuilt.insert(entry.key, entry.expires_at);
                }
                Some(_) => {
                    let _ = std::fs::remove_file(path);
                    removed += 1;
                }
                // Corrupt files were deleted by read_entry.
                None => removed += 1,
            }
        }

        *metadata = rebuilt;
        self.save_metadata(&metadata);
        removed
    }

    fn len(&self) -> usize {
        self.metadata.lock().len()
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Translation cache with TTL over a pluggable backend
#[derive(Clone)]
pub struct TranslationCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    enabled: bool,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TranslationCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            enabled: true,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Memory-backed cache
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), ttl)
    }

    /// Cache that never stores anything
    pub fn disabled() -> Self {
        let mut cache = Self::in_memory(Duration::zero());
        cache.enabled = false;
        cache
    }

    /// File cache at the configured directory; memory cache if that fails
    pub fn from_config(config: &Config) -> Self {
        if !config.cache.enabled {
            return Self::disabled();
        }
        let dir = config.cache_dir().join("translations");
        match FileCacheBackend::open(&dir) {
            Ok(backend) => Self::new(Arc::new(backend), config.cache_ttl()),
            Err(e) => {
                warn!("Cache directory {} unusable ({}), using memory cache", dir.display(), e);
                Self::in_memory(config.cache_ttl())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deterministic key for a request
    pub fn generate_key(fields: &CacheKeyFields<'_>) -> String {
        let normalized = normalize_source(fields.source_text);
        let mut pairs = vec![
            ("mode", fields.mode.to_string()),
            ("preserve_formatting", fields.preserve_formatting.to_string()),
            ("provider", fields.provider.unwrap_or("auto").to_ascii_lowercase()),
            ("source_text", normalized),
            ("target_language", fields.target_language.trim().to_ascii_lowercase()),
        ];
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (name, value) in &pairs {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update([0x1f]);
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..KEY_LENGTH].to_string()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        match self.backend.get(key) {
            Some(entry) if !entry.is_expired(Utc::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {}", key);
                Some(entry.translation)
            }
            Some(_) => {
                debug!("Cache entry {} expired", key);
                self.backend.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store with the default TTL
    pub fn set(&self, key: &str, translation: &str) {
        self.set_with_ttl(key, translation, self.ttl);
    }

    pub fn set_with_ttl(&self, key: &str, translation: &str, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let now = Utc::now();
        self.backend.set(CacheEntry {
            key: key.to_string(),
            translation: translation.to_string(),
            created_at: now,
            expires_at: now + ttl,
        });
    }

    /// Remove every expired entry
    pub fn sweep(&self) -> usize {
        let removed = self.backend.sweep(Utc::now());
        debug!("Cache sweep removed {} entries", removed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.backend.len(),
        }
    }
}

/// Trim and unify line endings
fn normalize_source(text: &str) -> String {
    text.replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
