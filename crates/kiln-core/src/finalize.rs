//! Artifact placement.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};

/// Move the compiled artifact from the workspace to `dest`.
///
/// Parent directories are created. A rename is tried first; when the
/// workspace lives on another filesystem the file is copied instead. The
/// result is executable on Unix.
pub fn place_artifact(src: &Path, dest: &Path) -> Result<()> {
    let fail = |e: io::Error| Error::Finalize {
        path: dest.to_path_buf(),
        message: e.to_string(),
    };

    if !src.is_file() {
        return Err(Error::Finalize {
            path: dest.to_path_buf(),
            message: format!("compiled artifact {} does not exist", src.display()),
        });
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }

    if let Err(e) = fs::rename(src, dest) {
        tracing::debug!("Rename failed ({}); copying instead", e);
        fs::copy(src, dest).map_err(fail)?;
        if let Err(e) = fs::remove_file(src) {
            tracing::warn!("Failed to remove {}: {}", src.display(), e);
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(dest).map_err(fail)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(dest, perms).map_err(fail)?;
    }

    tracing::info!("Build complete: {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_place_artifact_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("caddy");
        fs::write(&src, b"\x7fELF").unwrap();
        let dest = dir.path().join("out/bin/caddy");

        place_artifact(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"\x7fELF");
    }

    #[cfg(unix)]
    #[test]
    fn test_place_artifact_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("caddy");
        fs::write(&src, b"bin").unwrap();
        let dest = dir.path().join("caddy-out");

        place_artifact(&src, &dest).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_missing_artifact_is_finalize_error() {
        let dir = TempDir::new().unwrap();
        let result = place_artifact(&dir.path().join("missing"), &dir.path().join("out"));
        assert!(matches!(result, Err(Error::Finalize { .. })));
    }

    #[test]
    fn test_dest_is_directory_fails() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("caddy");
        fs::write(&src, b"bin").unwrap();
        let dest = dir.path().join("taken");
        fs::create_dir_all(dest.join("child")).unwrap();

        assert!(matches!(place_artifact(&src, &dest), Err(Error::Finalize { .. })));
    }
}
