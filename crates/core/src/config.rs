//! Per-set construction options.
//!
//! Hosts usually embed `SetOptions` in their own config file (it derives
//! `Deserialize`, missing fields fall back to defaults) or pick it up from the
//! environment with `from_env`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Removal history retained when nothing else is configured.
pub const DEFAULT_MAX_REMOVALS: usize = 99;

/// Environment variable read by [`SetOptions::from_env`].
pub const ENV_MAX_REMOVALS: &str = "GSET_MAX_REMOVALS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    /// Bound on the removal log. Consumers older than the oldest retained
    /// removal get a full snapshot instead of an incremental delta.
    pub max_removals: usize,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            max_removals: DEFAULT_MAX_REMOVALS,
        }
    }
}

impl SetOptions {
    pub fn with_max_removals(mut self, n: usize) -> Self {
        self.max_removals = n;
        self
    }

    /// Defaults, overridden by `GSET_MAX_REMOVALS` when set.
    pub fn from_env() -> Result<Self> {
        match std::env::var(ENV_MAX_REMOVALS) {
            Ok(raw) => Self::default().with_max_removals_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    fn with_max_removals_str(self, raw: &str) -> Result<Self> {
        let n = raw.trim().parse::<usize>().map_err(|e| {
            Error::invariant(format!("{ENV_MAX_REMOVALS}={raw:?} is not a count: {e}"))
        })?;
        Ok(self.with_max_removals(n))
    }
}
