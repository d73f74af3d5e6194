//! Per-sender fixed-window request quota with a durable JSON store.
//!
//! Each identity owns one [`RateWindow`]. A call to [`RateLimiter::allow`]
//! either starts a fresh window (count = 1) or bumps the count of the
//! current one; the call is allowed iff the count stays within the limit.
//! Rejected calls still increment the counter.
//!
//! Every mutating call is one critical section: the in-process mutex and
//! an exclusive lock on `<store>.lock` are held while the map is refreshed
//! from disk, updated, and written back through a temp file + rename.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StoreError;

/// Seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Counter state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub request_count: u32,
    pub window_start: i64,
}

/// Quota for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

/// Fixed-window rate limiter; safe to share one store between processes.
pub struct RateLimiter {
    path: Option<PathBuf>,
    windows: Mutex<HashMap<String, RateWindow>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Open (or create on first write) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let windows = read_store(&path)?;
        info!(
            path = %path.display(),
            identities = windows.len(),
            "Rate limit store loaded"
        );
        Ok(Self {
            path: Some(path),
            windows: Mutex::new(windows),
            clock: Arc::new(SystemClock),
        })
    }

    /// Limiter without durable storage.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            windows: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Count a request for `identity` and report whether it fits the quota.
    pub fn allow(
        &self,
        identity: &str,
        max_requests: u32,
        window_secs: u64,
    ) -> Result<bool, StoreError> {
        let key = normalize_identity(identity);
        let mut windows = self.windows.lock().map_err(|_| StoreError::Poisoned)?;

        let _file_lock = match &self.path {
            Some(path) => {
                let guard = lock_store(path)?;
                *windows = read_store(path)?;
                Some(guard)
            }
            None => None,
        };

        let now = self.clock.now();
        let window = windows.entry(key.clone()).or_insert(RateWindow {
            request_count: 0,
            window_start: now,
        });

        if elapsed(now, window.window_start) >= window_secs {
            window.request_count = 1;
            window.window_start = now;
        } else {
            window.request_count = window.request_count.saturating_add(1);
        }
        let count = window.request_count;

        if let Some(path) = &self.path {
            write_store(path, &windows)?;
        }

        let allowed = count <= max_requests;
        debug!(identity = %key, count, max_requests, allowed, "Rate limit check");
        Ok(allowed)
    }

    /// Seconds until the identity's current window ends (never negative).
    pub fn time_until_reset(&self, identity: &str, window_secs: u64) -> u64 {
        let key = normalize_identity(identity);
        let now = self.clock.now();
        let start = self
            .windows
            .lock()
            .ok()
            .and_then(|w| w.get(&key).map(|r| r.window_start))
            .unwrap_or(now);
        window_secs.saturating_sub(elapsed(now, start))
    }

    /// [`allow`](Self::allow) plus the wait time on denial.
    pub fn check(&self, identity: &str, policy: QuotaPolicy) -> Result<QuotaDecision, StoreError> {
        if self.allow(identity, policy.max_requests, policy.window_secs)? {
            Ok(QuotaDecision::Allowed)
        } else {
            Ok(QuotaDecision::Denied {
                retry_after_secs: self.time_until_reset(identity, policy.window_secs),
            })
        }
    }

    /// Current record for `identity`, if any.
    pub fn window(&self, identity: &str) -> Option<RateWindow> {
        let key = normalize_identity(identity);
        self.windows.lock().ok()?.get(&key).copied()
    }
}

/// Lower-cased, trimmed identity used as the store key.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

fn elapsed(now: i64, start: i64) -> u64 {
    u64::try_from(now.saturating_sub(start)).unwrap_or(0)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_store(path: &Path) -> Result<HashMap<String, RateWindow>, StoreError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(io_err(path)(e)),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }
    serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_store(path: &Path, windows: &HashMap<String, RateWindow>) -> Result<(), StoreError> {
    let json = serde_json::to_vec(windows)?;
    let parent = store_dir(path);
    std::fs::create_dir_all(parent).map_err(io_err(path))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err(path))?;
    tmp.write_all(&json).map_err(io_err(path))?;
    tmp.as_file().sync_all().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

/// Exclusive lock on the sidecar lock file; released when dropped.
fn lock_store(path: &Path) -> Result<File, StoreError> {
    let sidecar = lock_path(path);
    std::fs::create_dir_all(store_dir(path)).map_err(io_err(path))?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&sidecar)
        .map_err(io_err(&sidecar))?;
    file.lock().map_err(io_err(&sidecar))?;
    Ok(file)
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn store_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
