//! Core engine for kiln, the custom binary builder.
//!
//! This crate provides:
//! - Directive parsing for plugins, replacements and embedded directories
//! - Build workspace assembly (`go.mod`, `main.go`, `embedded.go`)
//! - A resolution–compile pipeline with classified, budgeted retries
//! - Artifact placement and workspace teardown
//!
//! # Example
//!
//! ```no_run
//! use kiln_core::{BuildConfig, Builder, parse_with};
//!
//! # fn main() -> kiln_core::Result<()> {
//! let plugin = parse_with("github.com/caddy-dns/cloudflare")?;
//! let config = BuildConfig::new("v2.7.0").with_plugin(plugin.dependency);
//!
//! let outcome = Builder::with_go(config)?.build(None)?;
//! println!("built {:?}", outcome.artifact);
//! # Ok(())
//! # }
//! ```

pub mod compile;
pub mod config;
pub mod context;
pub mod directive;
pub mod error;
pub mod finalize;
pub mod platform;
pub mod workspace;

pub use compile::{
    BuildOutcome, Builder, Classification, CommandOutput, DiagnosticClassifier,
    GoDiagnosticClassifier, GoToolchain, Invocation, Prune, Stage, Toolchain,
};
pub use config::{
    BaseProgram, BuildConfig, CompileOptions, EmbedHook, EmbedRegistration, split_flags,
};
pub use context::{AbortHandle, BuildCallback};
pub use directive::{
    Dependency, EmbedDir, Replace, ReplacementPath, WithDirective, parse_embed, parse_replace,
    parse_with,
};
pub use error::{Error, Result};
pub use finalize::place_artifact;
pub use platform::Target;
pub use workspace::Workspace;
