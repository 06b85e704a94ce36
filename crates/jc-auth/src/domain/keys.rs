//! # API Key Registry
//!
//! In-memory store of API keys and their quotas. Reads take a shared lock;
//! `create` and `touch` take the write lock briefly.
//!
//! ## Persistence
//!
//! When keys were loaded from a file, changes are written back to it at most
//! once per persist interval. Changes inside the window only mark the registry
//! dirty. The periodic [`flush_task`] writes them once the window has passed;
//! `flush()` writes them unconditionally at shutdown. Writes go to a temp file
//! that is then renamed over the target.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::config::{KeyStoreConfig, RateLimitConfig};
use super::error::{KeyRegistryError, MIN_KEY_LENGTH};

/// An API key and its quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub key: String,
    /// Requests per minute
    pub rate_limit: u32,
    /// Token bucket capacity
    pub burst: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Listing view with the key masked to its last four characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedKeyInfo {
    pub key: String,
    pub rate_limit: u32,
    pub burst: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&ApiKeyInfo> for MaskedKeyInfo {
    fn from(info: &ApiKeyInfo) -> Self {
        Self {
            key: mask_key(&info.key),
            rate_limit: info.rate_limit,
            burst: info.burst,
            enabled: info.enabled,
            created_at: info.created_at,
            last_used: info.last_used,
        }
    }
}

/// Mask a key as `****` followed by its last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{tail}")
}

/// Default quota applied to keys supplied without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub rate_limit: u32,
    pub burst: u32,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            burst: 10,
        }
    }
}

impl From<&RateLimitConfig> for Quota {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            rate_limit: config.default_rate_limit,
            burst: config.default_burst,
        }
    }
}

/// A key entry as it appears in a key file or inline value.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyRecord {
    Bare(String),
    Full {
        key: String,
        rate_limit: Option<u32>,
        burst: Option<u32>,
        enabled: Option<bool>,
        created_at: Option<DateTime<Utc>>,
        last_used: Option<DateTime<Utc>>,
    },
}

impl KeyRecord {
    fn into_info(self, defaults: Quota, now: DateTime<Utc>) -> ApiKeyInfo {
        match self {
            KeyRecord::Bare(key) => ApiKeyInfo {
                key: key.trim().to_string(),
                rate_limit: defaults.rate_limit,
                burst: defaults.burst,
                enabled: true,
                created_at: now,
                last_used: None,
            },
            KeyRecord::Full {
                key,
                rate_limit,
                burst,
                enabled,
                created_at,
                last_used,
            } => ApiKeyInfo {
                key: key.trim().to_string(),
                rate_limit: rate_limit.filter(|r| *r > 0).unwrap_or(defaults.rate_limit),
                burst: burst.filter(|b| *b > 0).unwrap_or(defaults.burst),
                enabled: enabled.unwrap_or(true),
                created_at: created_at.unwrap_or(now),
                last_used,
            },
        }
    }
}

/// Parse a key list: a JSON array (of objects or strings) or a comma-separated list.
pub fn parse_key_list(value: &str, defaults: Quota) -> Result<Vec<ApiKeyInfo>, KeyRegistryError> {
    let now = Utc::now();
    let trimmed = value.trim();

    if trimmed.starts_with('[') {
        let records: Vec<KeyRecord> =
            serde_json::from_str(trimmed).map_err(|e| KeyRegistryError::Parse(e.to_string()))?;
        return Ok(records
            .into_iter()
            .map(|r| r.into_info(defaults, now))
            .filter(|info| !info.key.is_empty())
            .collect());
    }

    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| KeyRecord::Bare(k.to_string()).into_info(defaults, now))
        .collect())
}

#[derive(Debug, Default)]
struct PersistState {
    last_write: Option<Instant>,
    dirty: bool,
}

impl PersistState {
    fn is_due(&self, interval: Duration) -> bool {
        self.last_write.map_or(true, |at| at.elapsed() >= interval)
    }
}

/// Thread-safe API key registry.
pub struct ApiKeyRegistry {
    keys: RwLock<HashMap<String, ApiKeyInfo>>,
    defaults: Quota,
    path: Option<PathBuf>,
    persist_interval: Duration,
    persist: Mutex<PersistState>,
}

impl ApiKeyRegistry {
    /// Build a registry from an explicit key set. `path`, if given, is the
    /// persistence target.
    pub fn new(
        keys: Vec<ApiKeyInfo>,
        defaults: Quota,
        path: Option<PathBuf>,
    ) -> Result<Self, KeyRegistryError> {
        let mut map = HashMap::with_capacity(keys.len());
        for info in keys {
            if map.contains_key(&info.key) {
                warn!(key = %mask_key(&info.key), "Duplicate API key in source, keeping first");
                continue;
            }
            map.insert(info.key.clone(), info);
        }

        if map.is_empty() {
            return Err(KeyRegistryError::NoKeys);
        }

        Ok(Self {
            keys: RwLock::new(map),
            defaults,
            path,
            persist_interval: Duration::from_secs(30),
            persist: Mutex::new(PersistState::default()),
        })
    }

    /// Load keys from the inline value if present, else from the key file.
    ///
    /// Only file-backed registries persist changes.
    pub fn load(config: &KeyStoreConfig, defaults: Quota) -> Result<Self, KeyRegistryError> {
        let registry = if let Some(inline) = &config.inline {
            let keys = parse_key_list(inline, defaults)?;
            info!(count = keys.len(), "Loaded API keys from environment");
            Self::new(keys, defaults, None)?
        } else {
            let keys = read_key_file(&config.file, defaults)?;
            info!(count = keys.len(), path = %config.file.display(), "Loaded API keys from file");
            Self::new(keys, defaults, Some(config.file.clone()))?
        };

        Ok(registry.with_persist_interval(config.persist_interval))
    }

    /// Override the minimum spacing between persisted writes.
    #[must_use]
    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    pub fn defaults(&self) -> Quota {
        self.defaults
    }

    pub fn lookup(&self, key: &str) -> Option<ApiKeyInfo> {
        self.keys.read().get(key).cloned()
    }

    /// Lookup restricted to enabled keys.
    pub fn lookup_enabled(&self, key: &str) -> Option<ApiKeyInfo> {
        self.lookup(key).filter(|info| info.enabled)
    }

    /// Add a new key. Omitted quota values take the registry defaults.
    pub fn create(
        &self,
        key: &str,
        rate_limit: Option<u32>,
        burst: Option<u32>,
    ) -> Result<ApiKeyInfo, KeyRegistryError> {
        let len = key.chars().count();
        if len < MIN_KEY_LENGTH {
            return Err(KeyRegistryError::KeyTooShort {
                min: MIN_KEY_LENGTH,
                len,
            });
        }

        let rate_limit = rate_limit.unwrap_or(self.defaults.rate_limit);
        let burst = burst.unwrap_or(self.defaults.burst);
        if rate_limit == 0 || burst == 0 {
            return Err(KeyRegistryError::InvalidQuota(
                "rate_limit and burst must be positive".into(),
            ));
        }

        let info = ApiKeyInfo {
            key: key.to_string(),
            rate_limit,
            burst,
            enabled: true,
            created_at: Utc::now(),
            last_used: None,
        };

        {
            let mut keys = self.keys.write();
            if keys.contains_key(key) {
                return Err(KeyRegistryError::DuplicateKey);
            }
            keys.insert(info.key.clone(), info.clone());
        }

        info!(key = %mask_key(key), rate_limit, burst, "API key created");
        self.persist_throttled();
        Ok(info)
    }

    /// Enable or disable a key.
    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<(), KeyRegistryError> {
        {
            let mut keys = self.keys.write();
            let info = keys.get_mut(key).ok_or(KeyRegistryError::NotFound)?;
            info.enabled = enabled;
        }
        info!(key = %mask_key(key), enabled, "API key state changed");
        self.persist_throttled();
        Ok(())
    }

    /// Record a successful authorization. Returns false for unknown keys.
    pub fn touch(&self, key: &str) -> bool {
        let found = match self.keys.write().get_mut(key) {
            Some(info) => {
                info.last_used = Some(Utc::now());
                true
            }
            None => false,
        };
        if found {
            self.persist_throttled();
        }
        found
    }

    /// All keys, oldest first.
    pub fn list(&self) -> Vec<ApiKeyInfo> {
        let mut keys: Vec<ApiKeyInfo> = self.keys.read().values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        keys
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// True when changes are waiting for the next flush.
    pub fn is_dirty(&self) -> bool {
        self.persist.lock().dirty
    }

    /// Write pending changes now, ignoring the throttle window. Returns
    /// whether a write happened. Used on shutdown.
    pub fn flush(&self) -> Result<bool, KeyRegistryError> {
        self.write_pending(true)
    }

    /// Write pending changes only once `persist_interval` has passed since
    /// the previous write.
    fn flush_if_due(&self) -> Result<bool, KeyRegistryError> {
        self.write_pending(false)
    }

    fn write_pending(&self, force: bool) -> Result<bool, KeyRegistryError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let mut state = self.persist.lock();
        if !state.dirty {
            return Ok(false);
        }
        if !force && !state.is_due(self.persist_interval) {
            return Ok(false);
        }
        self.write_to(path)?;
        state.dirty = false;
        state.last_write = Some(Instant::now());
        debug!(path = %path.display(), forced = force, "Flushed API key registry");
        Ok(true)
    }

    fn persist_throttled(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let mut state = self.persist.lock();
        if !state.is_due(self.persist_interval) {
            state.dirty = true;
            return;
        }

        match self.write_to(path) {
            Ok(()) => {
                state.dirty = false;
                state.last_write = Some(Instant::now());
            }
            Err(e) => {
                state.dirty = true;
                warn!(error = %e, path = %path.display(), "Failed to persist API keys");
            }
        }
    }

    fn write_to(&self, path: &Path) -> Result<(), KeyRegistryError> {
        let bytes = serde_json::to_vec_pretty(&self.list())
            .map_err(|e| KeyRegistryError::Io(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| KeyRegistryError::Io(e.to_string()))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let mut file =
            std::fs::File::create(&temp_path).map_err(|e| KeyRegistryError::Io(e.to_string()))?;
        file.write_all(&bytes)
            .map_err(|e| KeyRegistryError::Io(e.to_string()))?;
        file.sync_all()
            .map_err(|e| KeyRegistryError::Io(e.to_string()))?;

        std::fs::rename(&temp_path, path).map_err(|e| KeyRegistryError::Io(e.to_string()))
    }
}

fn read_key_file(path: &Path, defaults: Quota) -> Result<Vec<ApiKeyInfo>, KeyRegistryError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_key_list(&contents, defaults),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "API key file not found");
            Ok(Vec::new())
        }
        Err(e) => Err(KeyRegistryError::Io(e.to_string())),
    }
}

/// Background task flushing pending registry changes
pub async fn flush_task(registry: Arc<ApiKeyRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let registry = Arc::clone(&registry);
        match tokio::task::spawn_blocking(move || registry.flush_if_due()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Periodic API key flush failed"),
            Err(e) => warn!(error = %e, "API key flush task panicked"),
        }
    }
}
