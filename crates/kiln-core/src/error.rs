//! Error types for kiln-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for kiln-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assembling and building a custom binary.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed `--with`, `--replace` or `--embed` directive.
    #[error("invalid directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    /// The build workspace could not be created or populated.
    #[error("workspace error at {}: {message}", path.display())]
    Workspace { path: PathBuf, message: String },

    /// The dependency graph could not be resolved.
    ///
    /// `diagnostic` is the resolver's last output, verbatim.
    #[error("dependency resolution failed after {attempts} attempt(s):\n{diagnostic}")]
    ResolutionFailed { attempts: u32, diagnostic: String },

    /// The compiler reported a failure. `diagnostic` is verbatim.
    #[error("compilation failed:\n{diagnostic}")]
    CompileFailed { diagnostic: String },

    /// The artifact could not be placed at the requested output path.
    #[error("failed to place artifact at {}: {message}", path.display())]
    Finalize { path: PathBuf, message: String },

    /// The external toolchain is missing or could not be started.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// The build was cancelled.
    #[error("build aborted")]
    Aborted,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_directive(directive: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDirective {
            directive: directive.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Workspace {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Render the error together with a recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::InvalidDirective { .. } => Some(
                "expected module[@version][=replacement] for --with/--replace \
                 and [all:][alias:]path for --embed",
            ),
            Self::ResolutionFailed { diagnostic, .. }
                if diagnostic.contains("cannot find module providing package") =>
            {
                Some(
                    "if the module is a dependency rather than a plugin, \
                     try --replace instead of --with",
                )
            }
            Self::ResolutionFailed { .. } | Self::CompileFailed { .. } => {
                Some("set KILN_SKIP_CLEANUP=1 to keep the build workspace for inspection")
            }
            Self::Toolchain(_) => Some("make sure the `go` command is installed and on PATH"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n\nhint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failure_keeps_diagnostic_verbatim() {
        let diagnostic = "go: example.com/mod@v9.9.9: invalid version: unknown revision v9.9.9";
        let err = Error::ResolutionFailed {
            attempts: 1,
            diagnostic: diagnostic.to_string(),
        };
        assert!(err.to_string().contains(diagnostic));
    }

    #[test]
    fn test_hint_suggests_replace_for_missing_package() {
        let err = Error::ResolutionFailed {
            attempts: 1,
            diagnostic: "cannot find module providing package example.com/x".to_string(),
        };
        assert!(err.with_hint().contains("--replace"));
    }

    #[test]
    fn test_no_hint_for_aborted() {
        assert_eq!(Error::Aborted.with_hint(), "build aborted");
    }
}
