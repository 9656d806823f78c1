//! Build workspace management.
//!
//! Every build runs in its own scratch directory:
//!
//! ```text
//! kiln_buildenv_<uuid>/
//! ├── go.mod         # module line, requires, replaces
//! ├── go.sum         # written by the resolver
//! ├── main.go        # blank imports + entry call
//! ├── embedded.go    # only when directories are embedded
//! └── embedded/      # copies of the embedded directories
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::compile::{generate_embedded_go, generate_go_mod, generate_main_go, plan_embeds};
use crate::config::BuildConfig;
use crate::error::{Error, Result};

/// Prefix of workspace directory names.
pub const WORKSPACE_PREFIX: &str = "kiln_buildenv_";

/// A uniquely named scratch directory for one build.
///
/// Removed on [`teardown`](Self::teardown) or, as a fallback, on drop, unless
/// it has been [kept](Self::keep).
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    keep: bool,
    removed: bool,
}

impl Workspace {
    /// Create a fresh workspace under `root`, or the system temp dir.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let root = root.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let name = format!("{WORKSPACE_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let path = root.join(name);

        fs::create_dir_all(&root).map_err(|e| Error::workspace(&root, e))?;
        fs::create_dir(&path).map_err(|e| Error::workspace(&path, e))?;
        tracing::info!("Created build workspace at {}", path.display());

        Ok(Self {
            path,
            keep: false,
            removed: false,
        })
    }

    /// Root directory of the workspace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the generated `go.mod`.
    pub fn go_mod(&self) -> PathBuf {
        self.path.join("go.mod")
    }

    /// Path of the resolver-written `go.sum`.
    pub fn go_sum(&self) -> PathBuf {
        self.path.join("go.sum")
    }

    /// Path of the generated `main.go`.
    pub fn main_go(&self) -> PathBuf {
        self.path.join("main.go")
    }

    /// Path of `embedded.go`, present only when directories are embedded.
    pub fn embedded_go(&self) -> PathBuf {
        self.path.join("embedded.go")
    }

    /// Whether the directory will be left behind.
    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Leave the directory on disk when the build ends.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    /// Write the generated sources and copy the embedded directories.
    pub fn assemble(&self, config: &BuildConfig) -> Result<()> {
        let bindings = plan_embeds(config);

        for binding in &bindings {
            if !binding.source.is_dir() {
                return Err(Error::workspace(
                    &binding.source,
                    "embed source is not a directory",
                ));
            }
            let dest = self.path.join(&binding.workspace_dir);
            copy_dir_all(&binding.source, &dest).map_err(|e| Error::workspace(&dest, e))?;
            tracing::debug!(
                "Copied {} to {}",
                binding.source.display(),
                dest.display()
            );
        }

        let main_go = generate_main_go(config);
        self.write(&self.main_go(), &main_go, config.debug)?;

        if let Some(embedded_go) = generate_embedded_go(config, &bindings) {
            self.write(&self.embedded_go(), &embedded_go, config.debug)?;
        }

        let go_mod = generate_go_mod(config);
        self.write(&self.go_mod(), &go_mod, config.debug)?;

        Ok(())
    }

    fn write(&self, path: &Path, contents: &str, debug: bool) -> Result<()> {
        if debug {
            tracing::debug!("Writing {}:\n{}", path.display(), contents);
        } else {
            tracing::debug!("Writing {}", path.display());
        }
        fs::write(path, contents).map_err(|e| Error::workspace(path, e))
    }

    /// Remove the workspace unless it is kept.
    ///
    /// Runs at most once. Failures are logged, never returned. Returns
    /// whether the directory was removed by this call.
    pub fn teardown(&mut self) -> bool {
        if self.removed {
            return false;
        }
        if self.keep {
            tracing::info!("Skipping cleanup; workspace at {}", self.path.display());
            return false;
        }

        self.removed = true;
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::info!("Cleaned up workspace {}", self.path.display());
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Failed to remove workspace {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed && !self.keep {
            self.teardown();
        }
    }
}

/// Recursively copy `src` into `dst`, following symlinks.
///
/// A symlinked directory that resolves to one of its own ancestors is
/// skipped with a warning, so link cycles terminate.
fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    let mut ancestors = vec![fs::canonicalize(src)?];
    copy_tree(src, dst, &mut ancestors)
}

fn copy_tree(src: &Path, dst: &Path, ancestors: &mut Vec<PathBuf>) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if !fs::metadata(&src_path)?.is_dir() {
            fs::copy(&src_path, &dst_path)?;
            continue;
        }

        let real = fs::canonicalize(&src_path)?;
        if ancestors.contains(&real) {
            tracing::warn!(
                "Skipping {}: links back to {}",
                src_path.display(),
                real.display()
            );
            continue;
        }
        ancestors.push(real);
        let copied = copy_tree(&src_path, &dst_path, ancestors);
        ancestors.pop();
        copied?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Dependency, EmbedDir};
    use tempfile::TempDir;

    #[test]
    fn test_create_unique_workspaces() {
        let root = TempDir::new().unwrap();
        let a = Workspace::create(Some(root.path())).unwrap();
        let b = Workspace::create(Some(root.path())).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(
            a.path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
        );
    }

    #[test]
    fn test_assemble_writes_sources() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(Some(root.path())).unwrap();
        let config = BuildConfig::new("v2.7.0")
            .with_plugin(Dependency::new("example.com/mod", "v1.0.0"));

        ws.assemble(&config).unwrap();

        let main_go = fs::read_to_string(ws.main_go()).unwrap();
        assert!(main_go.contains("_ \"example.com/mod\""));
        let go_mod = fs::read_to_string(ws.go_mod()).unwrap();
        assert!(go_mod.contains("example.com/mod v1.0.0"));
        assert!(!ws.embedded_go().exists());
    }

    #[test]
    fn test_assemble_copies_embeds() {
        let root = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();
        fs::create_dir_all(site.path().join("css")).unwrap();
        fs::write(site.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(site.path().join("css/site.css"), "body{}").unwrap();

        let ws = Workspace::create(Some(root.path())).unwrap();
        let config = BuildConfig::new("v2.7.0").with_embed(EmbedDir {
            dir: site.path().to_string_lossy().into_owned(),
            name: "www".to_string(),
            include_all: false,
        });
        ws.assemble(&config).unwrap();

        let copied = ws.path().join("embedded/embeddedwww");
        assert_eq!(
            fs::read_to_string(copied.join("index.html")).unwrap(),
            "<h1>hi</h1>"
        );
        assert!(copied.join("css/site.css").is_file());
        assert!(ws.embedded_go().is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_in_embed_is_skipped() {
        use std::os::unix::fs::symlink;

        let root = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        fs::write(site.path().join("index.html"), "hi").unwrap();
        fs::create_dir(site.path().join("docs")).unwrap();
        fs::write(site.path().join("docs/a.md"), "a").unwrap();
        fs::write(shared.path().join("logo.svg"), "<svg/>").unwrap();
        symlink(site.path(), site.path().join("docs/up")).unwrap();
        symlink(".", site.path().join("docs/here")).unwrap();
        symlink(shared.path(), site.path().join("shared")).unwrap();

        let ws = Workspace::create(Some(root.path())).unwrap();
        let config = BuildConfig::new("v2.7.0").with_embed(EmbedDir {
            dir: site.path().to_string_lossy().into_owned(),
            name: "www".to_string(),
            include_all: false,
        });
        ws.assemble(&config).unwrap();

        let copied = ws.path().join("embedded/embeddedwww");
        assert!(copied.join("index.html").is_file());
        assert!(copied.join("docs/a.md").is_file());
        assert!(!copied.join("docs/up").exists());
        assert!(!copied.join("docs/here").exists());
        assert_eq!(
            fs::read_to_string(copied.join("shared/logo.svg")).unwrap(),
            "<svg/>"
        );
    }

    #[test]
    fn test_missing_embed_dir_is_workspace_error() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(Some(root.path())).unwrap();
        let config = BuildConfig::new("v2.7.0").with_embed(EmbedDir {
            dir: root.path().join("nope").to_string_lossy().into_owned(),
            name: String::new(),
            include_all: false,
        });

        assert!(matches!(ws.assemble(&config), Err(Error::Workspace { .. })));
    }

    #[test]
    fn test_teardown_runs_once() {
        let root = TempDir::new().unwrap();
        let mut ws = Workspace::create(Some(root.path())).unwrap();
        let path = ws.path().to_path_buf();

        assert!(ws.teardown());
        assert!(!path.exists());
        assert!(!ws.teardown());
    }

    #[test]
    fn test_kept_workspace_survives_drop() {
        let root = TempDir::new().unwrap();
        let mut ws = Workspace::create(Some(root.path())).unwrap();
        ws.keep();
        let path = ws.path().to_path_buf();

        assert!(!ws.teardown());
        drop(ws);
        assert!(path.is_dir());
    }

    #[test]
    fn test_drop_removes_workspace() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(Some(root.path())).unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }
}
