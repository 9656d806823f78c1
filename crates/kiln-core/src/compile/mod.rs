//! Build pipeline for custom binaries.
//!
//! This module provides:
//! - Manifest and entry-point generation
//! - Toolchain invocation (the `go` command, or any [`Toolchain`])
//! - Diagnostic classification for retrying transient resolver failures
//! - The resolution–compile pipeline and the [`Builder`] that owns a build
//!
//! # Architecture
//!
//! ```text
//! BuildConfig
//!     │
//!     ├── gomod_generator ──► go.mod
//!     ├── source_generator ──► main.go, embedded.go
//!     │
//!     └── Pipeline ──► go get ──► go mod tidy ──► go build
//!             │            └── retry ◄── DiagnosticClassifier
//!             │
//!             └── artifact ──► finalize ──► output path
//! ```

mod builder;
mod diagnostics;
mod gomod_generator;
mod pipeline;
mod source_generator;
mod toolchain;

pub use builder::{BuildOutcome, Builder};
pub use diagnostics::{
    Classification, DiagnosticClassifier, GoDiagnosticClassifier, Prune, Rule, RuleAction,
};
pub use gomod_generator::{MAIN_MODULE, format_replace, generate_go_mod, is_canonical_version};
pub use pipeline::{Pipeline, PipelineReport, Stage, escape_module_path};
pub use source_generator::{
    EMBED_ROOT, EmbedBinding, generate_embedded_go, generate_main_go, plan_embeds,
};
pub use toolchain::{CommandOutput, GoToolchain, Invocation, Toolchain, run_process};
