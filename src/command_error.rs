// Persisted record of the last command failure per event UID.
//
// Kept outside the calendar files so the error survives a restart even if
// the display was acknowledged, and is surfaced the next time the alarm
// list is shown. All IO goes through the shared lock + atomic-write
// helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::context::AppContext;
use crate::model::event::CommandError;
use crate::storage;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CommandErrorStore {
    #[serde(default)]
    errors: HashMap<String, String>,
}

impl CommandErrorStore {
    fn get_path(ctx: &dyn AppContext) -> Option<PathBuf> {
        ctx.get_command_error_path()
    }

    fn load_internal(path: &PathBuf) -> Self {
        if path.exists()
            && let Ok(content) = fs::read_to_string(path)
            && let Ok(store) = serde_json::from_str(&content)
        {
            return store;
        }
        Self::default()
    }

    /// Loads the store from disk; a missing or corrupt file reads empty.
    pub fn load(ctx: &dyn AppContext) -> Self {
        if let Some(path) = Self::get_path(ctx) {
            if !path.exists() {
                return Self::default();
            }
            return storage::with_lock(&path, || Ok(Self::load_internal(&path)))
                .unwrap_or_default();
        }
        Self::default()
    }

    pub fn get(&self, uid: &str) -> CommandError {
        self.errors
            .get(uid)
            .map(|v| CommandError::parse(v))
            .unwrap_or(CommandError::None)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Applies a mutation to the on-disk store under its lock.
    fn modify<F>(ctx: &dyn AppContext, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        if let Some(path) = Self::get_path(ctx) {
            storage::with_lock(&path, || {
                let mut store = Self::load_internal(&path);
                f(&mut store.errors);
                let json = serde_json::to_string_pretty(&store)?;
                storage::atomic_write(&path, json)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Records (or clears) the command error for one event.
    pub fn record(ctx: &dyn AppContext, uid: &str, error: CommandError) -> Result<()> {
        Self::modify(ctx, |errors| {
            if error == CommandError::None {
                errors.remove(uid);
            } else {
                errors.insert(uid.to_string(), error.as_str().to_string());
            }
        })
    }

    /// Drops entries for events that no longer exist.
    pub fn prune(ctx: &dyn AppContext, live_uids: &[String]) -> Result<()> {
        Self::modify(ctx, |errors| {
            errors.retain(|uid, _| live_uids.iter().any(|u| u == uid));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;

    #[test]
    fn record_and_reload() {
        let ctx = TestContext::new();
        CommandErrorStore::record(&ctx, "uid-1", CommandError::Pre).unwrap();
        let store = CommandErrorStore::load(&ctx);
        assert_eq!(store.get("uid-1"), CommandError::Pre);
        assert_eq!(store.get("uid-2"), CommandError::None);

        CommandErrorStore::record(&ctx, "uid-1", CommandError::None).unwrap();
        let store = CommandErrorStore::load(&ctx);
        assert!(store.is_empty());
    }
}
