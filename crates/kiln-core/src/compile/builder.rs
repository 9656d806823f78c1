//! End-to-end build orchestration.

use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::context::{AbortHandle, BuildCallback};
use crate::directive::absolutize;
use crate::error::Result;
use crate::finalize::place_artifact;
use crate::workspace::Workspace;

use super::diagnostics::{DiagnosticClassifier, GoDiagnosticClassifier};
use super::pipeline::{Pipeline, PipelineReport, Stage};
use super::toolchain::{GoToolchain, Toolchain};

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Final artifact path (`None` for skip-build runs).
    pub artifact: Option<PathBuf>,

    /// The build workspace. Only still on disk when `workspace_kept`.
    pub workspace: PathBuf,

    /// Whether the workspace was left behind.
    pub workspace_kept: bool,

    /// Retry credits consumed during resolution.
    pub retries_used: u32,

    /// Last stage reached.
    pub stage: Stage,
}

/// Builds a custom binary from a [`BuildConfig`].
///
/// Owns the whole lifecycle: workspace creation, assembly, resolution,
/// compilation, artifact placement and teardown. The workspace is torn down
/// exactly once on every exit path unless cleanup is skipped.
pub struct Builder {
    config: BuildConfig,
    toolchain: Box<dyn Toolchain>,
    classifier: Box<dyn DiagnosticClassifier>,
    abort: AbortHandle,
    callback: Option<Box<dyn BuildCallback>>,
}

impl Builder {
    /// Create a builder driving the given toolchain.
    pub fn new(config: BuildConfig, toolchain: impl Toolchain + 'static) -> Self {
        Self {
            config: config.normalized(),
            toolchain: Box::new(toolchain),
            classifier: Box::new(GoDiagnosticClassifier::new()),
            abort: AbortHandle::new(),
            callback: None,
        }
    }

    /// Create a builder using the `go` found on `PATH`.
    pub fn with_go(config: BuildConfig) -> Result<Self> {
        Ok(Self::new(config, GoToolchain::new()?))
    }

    /// Use a custom diagnostic classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl DiagnosticClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Share an existing abort handle.
    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_callback(mut self, callback: impl BuildCallback + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The effective configuration, after option implications are applied.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// A handle that cancels this builder's runs.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run the build, placing the artifact at `output` (resolved against the
    /// working directory) or at the default output path.
    pub fn build(&self, output: Option<&Path>) -> Result<BuildOutcome> {
        self.abort.check()?;

        let config = &self.config;
        let output = match output {
            Some(path) => absolutize(&config.working_dir, path),
            None => config.default_output(),
        };

        let mut workspace = Workspace::create(config.temp_root.as_deref())?;
        if config.skip_cleanup {
            workspace.keep();
        }

        let result = self.build_in(&workspace, &output);

        let workspace_kept = workspace.is_kept();
        if workspace_kept {
            tracing::info!("Workspace at {}", workspace.path().display());
        } else {
            workspace.teardown();
            if let Some(cb) = &self.callback {
                cb.on_teardown(workspace.path());
            }
        }

        let report = result?;
        Ok(BuildOutcome {
            artifact: report.artifact.map(|_| output),
            workspace: workspace.path().to_path_buf(),
            workspace_kept,
            retries_used: report.retries_used,
            stage: report.stage,
        })
    }

    fn build_in(&self, workspace: &Workspace, output: &Path) -> Result<PipelineReport> {
        let config = &self.config;
        workspace.assemble(config)?;

        let mut pipeline =
            Pipeline::new(self.toolchain.as_ref(), self.classifier.as_ref(), &self.abort)
                .with_callback(self.callback.as_deref());
        let report = pipeline.run(config, workspace.path(), config.skip_build)?;

        if let Some(artifact) = &report.artifact {
            self.abort.check()?;
            place_artifact(artifact, output)?;
        }
        Ok(report)
    }
}
