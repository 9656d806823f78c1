//! Directive parsing for plugins, replacements and embedded directories.
//!
//! Turns the compact command-line grammars into structured values:
//!
//! ```text
//! --with     module[@version][=replacement]
//! --replace  module[@version]=replacement
//! --embed    [all:][alias:]path
//! ```
//!
//! Everything here is pure: no IO, and every malformed input produces an
//! [`Error::InvalidDirective`] rather than a panic.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// A plugin module to statically link into the build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dependency {
    /// Import path of the package (never ends with `/`).
    pub package_path: String,

    /// Version constraint: semver tag, pseudo-version, branch or commit.
    /// Empty lets the resolver pick the latest.
    pub version: String,
}

impl Dependency {
    /// Create a dependency, trimming a trailing `/` from the path.
    pub fn new(package_path: impl Into<String>, version: impl Into<String>) -> Self {
        let package_path = package_path.into();
        Self {
            package_path: package_path.trim_end_matches('/').to_string(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.package_path)
        } else {
            write!(f, "{}@{}", self.package_path, self.version)
        }
    }
}

/// The right-hand side of a replace directive.
///
/// Holds either a filesystem path or a module reference written as
/// `module version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReplacementPath(String);

impl ReplacementPath {
    /// Wrap a replacement as written by the user.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The replacement exactly as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this replacement points at the local filesystem.
    pub fn is_local(&self) -> bool {
        looks_like_filesystem_path(&self.0)
    }

    /// Render the resolver-facing form.
    ///
    /// `module version` becomes `module@version`; filesystem paths and bare
    /// module paths come back unchanged.
    pub fn param(&self) -> String {
        if self.is_local() {
            return self.0.clone();
        }
        let mut parts = self.0.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(module), Some(version), None) => format!("{module}@{version}"),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for ReplacementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplacementPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A manifest-level module substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Replace {
    /// Serialized [`Dependency`]: `path` or `path@version`.
    pub old: String,

    /// Where references to `old` are redirected.
    pub new: ReplacementPath,
}

impl Replace {
    /// Redirect `old` (`path` or `path@version`) to `new`.
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: ReplacementPath::new(new),
        }
    }

    /// Module path of the replaced side, without any version.
    pub fn old_module(&self) -> &str {
        self.old.split_once('@').map_or(self.old.as_str(), |(m, _)| m)
    }
}

/// A directory to embed into the compiled binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EmbedDir {
    /// Directory on disk.
    pub dir: String,

    /// Optional alias the directory is registered under.
    pub name: String,

    /// Include dot-files and `_`-prefixed files.
    pub include_all: bool,
}

/// A parsed `--with` directive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WithDirective {
    pub dependency: Dependency,
    pub replacement: Option<ReplacementPath>,
}

impl WithDirective {
    /// The replace entry implied by `module=replacement`, if any.
    ///
    /// Relative filesystem replacements are resolved against `cwd`.
    pub fn replace(&self, cwd: &Path) -> Option<Replace> {
        self.replacement.as_ref().map(|repl| Replace {
            old: self.dependency.to_string(),
            new: resolve_replacement(repl, cwd),
        })
    }
}

/// Parse `module[@version][=replacement]`.
pub fn parse_with(s: &str) -> Result<WithDirective> {
    // Module paths and versions never contain '=', so the first one splits.
    let (left, replacement) = match s.split_once('=') {
        Some((left, right)) => {
            if right.trim().is_empty() {
                return Err(Error::invalid_directive(s, "replacement after '=' is empty"));
            }
            (left, Some(ReplacementPath::new(right)))
        }
        None => (s, None),
    };

    let (module, version) = match left.rfind('@') {
        Some(idx) => (&left[..idx], &left[idx + 1..]),
        None => (left, ""),
    };

    let module = module.trim_end_matches('/');
    if module.is_empty() {
        return Err(Error::invalid_directive(s, "module path is required"));
    }
    if module.chars().any(char::is_whitespace) {
        return Err(Error::invalid_directive(s, "module path must not contain whitespace"));
    }

    Ok(WithDirective {
        dependency: Dependency::new(module, version),
        replacement,
    })
}

/// Parse `module[@version]=replacement`.
///
/// The replacement is mandatory. A relative filesystem replacement is made
/// absolute against `cwd`, because the manifest is written elsewhere.
pub fn parse_replace(s: &str, cwd: &Path) -> Result<Replace> {
    let with = parse_with(s)?;
    with.replace(cwd)
        .ok_or_else(|| Error::invalid_directive(s, "replacement is required (module=replacement)"))
}

/// Parse `[all:][alias:]path`.
///
/// A bare `all:` prefix is an ordinary alias named `all`; only `all:` followed
/// by another `:` marks the directory as include-all.
pub fn parse_embed(s: &str) -> Result<EmbedDir> {
    let mut rest = s;
    let mut include_all = false;

    if let Some(after) = s.strip_prefix("all:") {
        if after.contains(':') {
            include_all = true;
            rest = after;
        }
    }

    let (name, dir) = match rest.split_once(':') {
        Some((name, dir)) => (name, dir),
        None => ("", rest),
    };

    if dir.is_empty() {
        return Err(Error::invalid_directive(s, "embed directory is empty"));
    }

    Ok(EmbedDir {
        dir: dir.to_string(),
        name: name.to_string(),
        include_all,
    })
}

fn resolve_replacement(repl: &ReplacementPath, cwd: &Path) -> ReplacementPath {
    if !repl.as_str().starts_with('.') {
        return repl.clone();
    }
    let resolved = absolutize(cwd, Path::new(repl.as_str()));
    tracing::info!(
        "Resolved relative replacement {} to {}",
        repl,
        resolved.display()
    );
    ReplacementPath::new(resolved.to_string_lossy())
}

/// Join `path` onto `base` and normalize `.` and `..` lexically.
pub(crate) fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn looks_like_filesystem_path(s: &str) -> bool {
    let bytes = s.as_bytes();
    s.starts_with('/')
        || s.starts_with('.')
        || s.starts_with('~')
        || s.contains('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}
