//! Purpose: Shared state-directory and store-file path resolution helpers.
//! Exports: `default_state_dir`, `store_path_in`, `STATE_DIR_ENV`, `STORE_FILE_NAME`.
//! Role: Keep CLI and library defaults aligned from one source.
//! Invariants: Default state directory remains `~/.filestate` unless `FILESTATE_DIR` is set.
//! Invariants: The store file name inside a state directory is always `state.db`.

use std::path::{Path, PathBuf};

pub const STATE_DIR_ENV: &str = "FILESTATE_DIR";
pub const STORE_FILE_NAME: &str = "state.db";

pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".filestate")
}

pub fn store_path_in(state_dir: &Path) -> PathBuf {
    state_dir.join(STORE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::store_path_in;
    use std::path::{Path, PathBuf};

    #[test]
    fn store_file_lives_in_state_dir() {
        assert_eq!(
            store_path_in(Path::new(".scratch/state")),
            PathBuf::from(".scratch/state/state.db")
        );
    }
}
