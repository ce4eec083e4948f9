//! Staging Buffer Manager: per-session input file, output file, and output
//! FIFO under the configured temp directory (spec.md §4.2).

use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::pool::PoolError;

/// The three filesystem paths a session's staging buffers live at.
#[derive(Debug, Clone)]
pub struct StagingPaths {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub pipe_path: PathBuf,
}

/// World rw (0o666) — the engine process may run as a different principal
/// and must be able to read/write these files, per spec.md §4.2.
const STAGING_MODE: u32 = 0o666;

impl StagingPaths {
    /// Create the input file, output file, and FIFO under `tmp_dir`, each
    /// with a unique name. The FIFO's name is allocated via the
    /// mktemp-then-replace trick spec.md calls for: create a regular file to
    /// claim a unique name atomically against concurrent pool peers, then
    /// remove it and `mkfifo` in its place.
    pub fn create(tmp_dir: &str, session_id: &str) -> Result<StagingPaths, PoolError> {
        let input_path = unique_path(tmp_dir, session_id, "in")?;
        let output_path = unique_path(tmp_dir, session_id, "out")?;
        let pipe_path = unique_fifo_path(tmp_dir, session_id)?;

        set_world_rw(&input_path)?;
        set_world_rw(&output_path)?;

        Ok(StagingPaths {
            input_path,
            output_path,
            pipe_path,
        })
    }

    /// Unlink all three paths. Missing-file errors are swallowed — cleanup
    /// must be idempotent, since a slot may be cleaned up more than once on
    /// an error path.
    pub fn cleanup(&self) {
        for path in [&self.input_path, &self.output_path, &self.pipe_path] {
            match std::fs::remove_file(path) {
                Ok(()) | Err(_) => {}
            }
        }
    }
}

fn unique_path(tmp_dir: &str, session_id: &str, kind: &str) -> Result<PathBuf, PoolError> {
    let file = tempfile::Builder::new()
        .prefix(&format!("query-gateway-{session_id}-{kind}-"))
        .tempfile_in(tmp_dir)
        .map_err(PoolError::Io)?;
    // Keep the name, drop the handle: the caller reopens it with the
    // permissions it actually needs (the engine writes it, not us).
    let (_file, path) = file.keep().map_err(|err| PoolError::Io(err.error))?;
    Ok(path)
}

fn unique_fifo_path(tmp_dir: &str, session_id: &str) -> Result<PathBuf, PoolError> {
    let claim = unique_path(tmp_dir, session_id, "pipe")?;
    std::fs::remove_file(&claim).map_err(PoolError::Io)?;
    mkfifo(&claim, Mode::from_bits_truncate(STAGING_MODE)).map_err(|errno| {
        PoolError::Io(std::io::Error::from_raw_os_error(errno as i32))
    })?;
    Ok(claim)
}

fn set_world_rw(path: &Path) -> Result<(), PoolError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(STAGING_MODE);
    std::fs::set_permissions(path, perms).map_err(PoolError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_allocates_three_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagingPaths::create(dir.path().to_str().unwrap(), "abc123").unwrap();
        assert!(paths.input_path.exists());
        assert!(paths.output_path.exists());
        assert!(paths.pipe_path.exists());
        assert_ne!(paths.input_path, paths.output_path);
        assert_ne!(paths.output_path, paths.pipe_path);
    }

    #[test]
    fn pipe_path_is_a_fifo() {
        use std::os::unix::fs::FileTypeExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = StagingPaths::create(dir.path().to_str().unwrap(), "fifo1").unwrap();
        let metadata = std::fs::metadata(&paths.pipe_path).unwrap();
        assert!(metadata.file_type().is_fifo());
    }

    #[test]
    fn cleanup_unlinks_all_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagingPaths::create(dir.path().to_str().unwrap(), "clean1").unwrap();
        paths.cleanup();
        assert!(!paths.input_path.exists());
        assert!(!paths.output_path.exists());
        assert!(!paths.pipe_path.exists());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagingPaths::create(dir.path().to_str().unwrap(), "clean2").unwrap();
        paths.cleanup();
        paths.cleanup();
    }
}
