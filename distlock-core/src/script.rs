//! Atomic lock scripts and the process-wide script reference cache

use crate::error::{LockError, LockResult};
use crate::stores::LockStore;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Compare-and-delete. ARGV[1] = owner id.
///
/// Returns -1 if the key is absent, 1 after deleting our own record,
/// 2 if another owner holds it.
pub const UNLOCK_SCRIPT: &str = r#"
local owner = redis.call("get", KEYS[1])
if owner == false then
    return -1
end
if owner ~= ARGV[1] then
    return 2
end
redis.call("del", KEYS[1])
return 1
"#;

/// Compare-and-renew. ARGV[1] = owner id, ARGV[2] = ttl in seconds.
///
/// Returns -1 if the key is absent, 1 after resetting our own expiry,
/// 2 if another owner holds it.
pub const KEEP_ALIVE_SCRIPT: &str = r#"
local owner = redis.call("get", KEYS[1])
if owner == false then
    return -1
end
if owner ~= ARGV[1] then
    return 2
end
redis.call("expire", KEYS[1], ARGV[2])
return 1
"#;

/// A scripted lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// Compare-and-delete
    Unlock,
    /// Compare-and-renew
    KeepAlive,
}

impl Script {
    /// Every script the lock protocol runs
    pub const ALL: [Script; 2] = [Script::Unlock, Script::KeepAlive];

    /// Lua source of the script
    pub fn body(&self) -> &'static str {
        match self {
            Script::Unlock => UNLOCK_SCRIPT,
            Script::KeepAlive => KEEP_ALIVE_SCRIPT,
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Script::Unlock => "unlock",
            Script::KeepAlive => "keep-alive",
        }
    }

    /// Identify a script from its source
    pub fn from_body(body: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|script| script.body() == body)
    }
}

/// Return code of a lock script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// -1: no record at the key
    NotLocked,
    /// 1: our record was deleted or renewed
    Applied,
    /// 2: another owner's record, left untouched
    Contested,
}

impl ScriptOutcome {
    /// Wire code of this outcome
    pub fn code(&self) -> i64 {
        match self {
            ScriptOutcome::NotLocked => -1,
            ScriptOutcome::Applied => 1,
            ScriptOutcome::Contested => 2,
        }
    }

    /// Parse a script return code. Codes outside {-1, 1, 2} are never
    /// produced by the scripts and are reported as unexpected.
    pub fn from_code(code: i64) -> LockResult<Self> {
        match code {
            -1 => Ok(ScriptOutcome::NotLocked),
            1 => Ok(ScriptOutcome::Applied),
            2 => Ok(ScriptOutcome::Contested),
            other => Err(LockError::unexpected(format!(
                "lock script returned code {other}"
            ))),
        }
    }
}

static GLOBAL_CACHE: Lazy<Arc<ScriptCache>> = Lazy::new(|| Arc::new(ScriptCache::new()));

/// Cache of script references registered with the store.
///
/// Starts empty, fills lazily on first use and drops entries individually
/// when the store reports them unknown. All reads and writes go through one
/// async mutex that is held across the registration round trip, so
/// concurrent handles never cache two references for one script.
///
/// Handles share [`ScriptCache::global`] unless given their own instance.
#[derive(Debug, Default)]
pub struct ScriptCache {
    refs: Mutex<HashMap<Script, String>>,
}

impl ScriptCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn global() -> Arc<ScriptCache> {
        GLOBAL_CACHE.clone()
    }

    /// Return the cached reference for `script`, registering it first if
    /// there is none.
    pub async fn ensure_registered(&self, store: &dyn LockStore, script: Script) -> LockResult<String> {
        let mut refs = self.refs.lock().await;

        if let Some(sha) = refs.get(&script) {
            trace!(script = script.name(), sha = %sha, "Script reference cached");
            return Ok(sha.clone());
        }

        let sha = store.script_load(script.body()).await?;
        debug!(script = script.name(), sha = %sha, store = store.store_type(), "Registered lock script");
        refs.insert(script, sha.clone());
        Ok(sha)
    }

    /// Forget the reference for `script` so the next
    /// [`ensure_registered`](Self::ensure_registered) registers it again
    pub async fn invalidate(&self, script: Script) {
        if let Some(sha) = self.refs.lock().await.remove(&script) {
            debug!(script = script.name(), sha = %sha, "Invalidated script reference");
        }
    }

    /// Make sure every script is registered, keeping cached references the
    /// store still knows and reloading the rest.
    pub async fn preload(&self, store: &dyn LockStore) -> LockResult<()> {
        let mut refs = self.refs.lock().await;

        for script in Script::ALL {
            if let Some(sha) = refs.get(&script)
                && store.script_exists(sha).await?
            {
                continue;
            }

            let sha = store.script_load(script.body()).await?;
            debug!(script = script.name(), sha = %sha, "Preloaded lock script");
            refs.insert(script, sha);
        }

        Ok(())
    }

    /// Currently cached reference for `script`
    pub async fn cached(&self, script: Script) -> Option<String> {
        self.refs.lock().await.get(&script).cloned()
    }
}
