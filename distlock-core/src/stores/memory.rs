//! In-memory lock store
//!
//! Emulates the shared store inside one process: string records with
//! expiry, a script table and an atomic delete-then-set. All state sits
//! behind one mutex, so every call is atomic with respect to every other.
//! Expiry is measured on the tokio clock, which lets tests drive TTLs with
//! a paused runtime.

use crate::error::{LockError, LockResult};
use crate::script::Script;
use crate::stores::LockStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    scripts: HashMap<String, String>,
}

impl State {
    /// Live record at `key`, dropping it first if it has expired
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Record> {
        if self
            .records
            .get(key)
            .is_some_and(|record| record.expires_at <= now)
        {
            trace!(key = %key, "Record expired");
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }
}

/// In-memory lock store
pub struct MemoryStore {
    state: Mutex<State>,
    /// Calls still to fail with an injected store error
    failures: AtomicUsize,
    /// Successful `script_load` calls
    loads: AtomicUsize,
    /// Accept registrations without keeping them
    volatile_scripts: AtomicBool,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory lock store");
        Self {
            state: Mutex::new(State::default()),
            failures: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            volatile_scripts: AtomicBool::new(false),
        }
    }

    /// Drop every registered script, like `SCRIPT FLUSH`
    pub fn flush_scripts(&self) {
        debug!("Flushing in-memory script table");
        self.state.lock().scripts.clear();
    }

    /// Make the next `n` store calls fail with [`LockError::Store`]
    pub fn fail_next_calls(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// When enabled, `script_load` answers with a reference but keeps
    /// nothing, so every reference is stale by the time it is used
    pub fn set_volatile_scripts(&self, enabled: bool) {
        self.volatile_scripts.store(enabled, Ordering::SeqCst);
    }

    /// Number of successful script registrations so far
    pub fn script_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of live records (for monitoring)
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .records
            .values()
            .filter(|record| record.expires_at > now)
            .count()
    }

    /// Remaining time to live of `key`
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.state
            .lock()
            .live(key, now)
            .map(|record| record.expires_at - now)
    }

    fn check_fault(&self, op: &str) -> LockResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected {
            debug!(op = op, "Injected store failure");
            return Err(LockError::store(format!("injected failure during {op}")));
        }
        Ok(())
    }

    fn run_script(state: &mut State, script: Script, key: &str, args: &[&str]) -> LockResult<i64> {
        let now = Instant::now();
        let owner = args
            .first()
            .ok_or_else(|| LockError::unexpected(format!("{} script called without owner", script.name())))?;

        let Some(record) = state.live(key, now) else {
            return Ok(-1);
        };

        if record.value != *owner {
            return Ok(2);
        }

        match script {
            Script::Unlock => {
                state.records.remove(key);
            }
            Script::KeepAlive => {
                let secs: u64 = args
                    .get(1)
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(|| LockError::unexpected("keep-alive script called without ttl seconds"))?;
                record.expires_at = now + Duration::from_secs(secs);
            }
        }

        Ok(1)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        self.check_fault("set_if_absent")?;
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.live(key, now).is_some() {
            trace!(key = %key, "set_if_absent: key present");
            return Ok(false);
        }

        state.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        trace!(key = %key, ttl = ?ttl, "set_if_absent: written");
        Ok(true)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.check_fault("get")?;
        let now = Instant::now();
        Ok(self
            .state
            .lock()
            .live(key, now)
            .map(|record| record.value.clone()))
    }

    async fn script_load(&self, body: &str) -> LockResult<String> {
        self.check_fault("script_load")?;
        let sha = hex::encode(Sha256::digest(body.as_bytes()));
        if !self.volatile_scripts.load(Ordering::SeqCst) {
            self.state.lock().scripts.insert(sha.clone(), body.to_string());
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(sha)
    }

    async fn script_exists(&self, sha: &str) -> LockResult<bool> {
        self.check_fault("script_exists")?;
        Ok(self.state.lock().scripts.contains_key(sha))
    }

    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[&str]) -> LockResult<i64> {
        self.check_fault("eval_sha")?;
        let mut state = self.state.lock();

        let body = state
            .scripts
            .get(sha)
            .ok_or_else(|| LockError::NoScript(sha.to_string()))?;
        let script = Script::from_body(body)
            .ok_or_else(|| LockError::unexpected(format!("unsupported script {sha}")))?;
        let key = keys
            .first()
            .ok_or_else(|| LockError::unexpected(format!("{} script called without key", script.name())))?;

        Self::run_script(&mut state, script, key, args)
    }

    async fn replace(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()> {
        self.check_fault("replace")?;
        let mut state = self.state.lock();
        state.records.remove(key);
        state.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.key_count())
            .finish()
    }
}
