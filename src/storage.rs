// Locked, atomic file access for calendar and state files.
//
// Writers take an exclusive flock on a sibling `.lock` file and replace the
// target via a temp-file rename, so a crash mid-write never corrupts a
// calendar. A per-path load-state guard refuses to save over a file whose
// last load failed, which would silently discard whatever the file held.

use anyhow::Result;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

static LOAD_STATE_MAP: OnceLock<Mutex<HashMap<PathBuf, LoadState>>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Uninitialized,
    Success,
    Failed,
}

impl LoadState {
    fn get(path: &Path) -> LoadState {
        let map = LOAD_STATE_MAP.get_or_init(|| Mutex::new(HashMap::new()));
        *map.lock()
            .unwrap()
            .get(path)
            .unwrap_or(&LoadState::Uninitialized)
    }

    fn set(path: &Path, state: LoadState) {
        let map = LOAD_STATE_MAP.get_or_init(|| Mutex::new(HashMap::new()));
        map.lock().unwrap().insert(path.to_path_buf(), state);
    }
}

fn get_lock_path(file_path: &Path) -> PathBuf {
    let mut lock_path = file_path.to_path_buf();
    if let Some(ext) = lock_path.extension() {
        let mut new_ext = ext.to_os_string();
        new_ext.push(".lock");
        lock_path.set_extension(new_ext);
    } else {
        lock_path.set_extension("lock");
    }
    lock_path
}

pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let lock_path = get_lock_path(file_path);
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    file.lock_exclusive()?;
    let result = f();
    file.unlock()?;
    result
}

pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Reads a calendar file under its lock. A missing file reads as an empty
/// string (a brand-new calendar).
pub fn read_calendar(path: &Path) -> Result<String> {
    if !path.exists() {
        LoadState::set(path, LoadState::Success);
        return Ok(String::new());
    }
    let result = with_lock(path, || Ok(fs::read_to_string(path)?));
    match &result {
        Ok(_) => LoadState::set(path, LoadState::Success),
        Err(_) => LoadState::set(path, LoadState::Failed),
    }
    result
}

/// Writes a calendar file under its lock, refusing when the last load of
/// the same path failed.
pub fn write_calendar(path: &Path, contents: &str) -> Result<()> {
    if !can_save(path) {
        return Err(anyhow::anyhow!(
            "Cannot save {}: previous load failed.",
            path.display()
        ));
    }
    with_lock(path, || atomic_write(path, contents))
}

pub fn can_save(path: &Path) -> bool {
    match LoadState::get(path) {
        LoadState::Uninitialized | LoadState::Success => true,
        LoadState::Failed => false,
    }
}

/// Marks a failed path loadable again once the user has intervened.
pub fn reset_load_state(path: &Path) {
    LoadState::set(path, LoadState::Uninitialized);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AppContext, TestContext};

    #[test]
    fn atomic_write_replaces_content() {
        let ctx = TestContext::new();
        let path = ctx.get_data_dir().unwrap().join("cal.ics");
        atomic_write(&path, "first").unwrap();
        atomic_write(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn missing_calendar_reads_empty() {
        let ctx = TestContext::new();
        let path = ctx.get_data_dir().unwrap().join("absent.ics");
        assert_eq!(read_calendar(&path).unwrap(), "");
        assert!(can_save(&path));
    }
}
