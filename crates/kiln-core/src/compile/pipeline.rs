//! Resolution–compile pipeline.
//!
//! Drives the toolchain through the build states:
//!
//! ```text
//! Init → ManifestInitialized → DependenciesFetched → DependenciesTidied → Compiled → Done
//! ```
//!
//! The fetch and tidy steps share one retry budget. A failed step is
//! classified; transient failures prune the offending local state and re-run
//! the whole step, fatal ones end the build. Compilation is never retried.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::context::{AbortHandle, BuildCallback};
use crate::error::{Error, Result};

use super::diagnostics::{Classification, DiagnosticClassifier, Prune};
use super::toolchain::{CommandOutput, Invocation, Toolchain};

/// Build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    ManifestInitialized,
    DependenciesFetched,
    DependenciesTidied,
    Compiled,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ManifestInitialized => "manifest initialized",
            Self::DependenciesFetched => "dependencies fetched",
            Self::DependenciesTidied => "dependencies tidied",
            Self::Compiled => "compiled",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Last stage reached.
    pub stage: Stage,

    /// Retry credits consumed.
    pub retries_used: u32,

    /// Compiled artifact inside the workspace (`None` when compile was skipped).
    pub artifact: Option<PathBuf>,
}

/// Runs the resolver and compiler inside an assembled workspace.
pub struct Pipeline<'a> {
    toolchain: &'a dyn Toolchain,
    classifier: &'a dyn DiagnosticClassifier,
    abort: &'a AbortHandle,
    callback: Option<&'a dyn BuildCallback>,
    stage: Stage,
    retries_used: u32,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline in the `Init` stage with a fresh retry count.
    pub fn new(
        toolchain: &'a dyn Toolchain,
        classifier: &'a dyn DiagnosticClassifier,
        abort: &'a AbortHandle,
    ) -> Self {
        Self {
            toolchain,
            classifier,
            abort,
            callback: None,
            stage: Stage::Init,
            retries_used: 0,
        }
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_callback(mut self, callback: Option<&'a dyn BuildCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Current state.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Retry credits consumed so far.
    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    /// Run the pipeline in `workspace`, whose `go.mod` must already exist.
    ///
    /// With `skip_compile`, stops after tidying and reports no artifact.
    pub fn run(
        &mut self,
        config: &BuildConfig,
        workspace: &Path,
        skip_compile: bool,
    ) -> Result<PipelineReport> {
        self.enter(Stage::ManifestInitialized);

        let fetch = fetch_invocations(config, workspace);
        self.run_resolution_step(&fetch, config.max_retries, workspace)?;
        self.enter(Stage::DependenciesFetched);

        let tidy = [tidy_invocation(config, workspace)];
        self.run_resolution_step(&tidy, config.max_retries, workspace)?;
        self.enter(Stage::DependenciesTidied);

        if skip_compile {
            tracing::info!("Skipping compilation");
            return Ok(self.report(None));
        }

        let artifact = workspace.join(
            config
                .compile
                .target
                .executable_name(&config.base.binary_name),
        );
        self.compile(config, workspace, &artifact)?;
        self.enter(Stage::Compiled);

        self.enter(Stage::Done);
        Ok(self.report(Some(artifact)))
    }

    fn report(&self, artifact: Option<PathBuf>) -> PipelineReport {
        PipelineReport {
            stage: self.stage,
            retries_used: self.retries_used,
            artifact,
        }
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!("Pipeline: {} -> {}", self.stage, stage);
        self.stage = stage;
        if let Some(cb) = self.callback {
            cb.on_stage(stage);
        }
    }

    /// Run every invocation of a step, re-running the whole step after each
    /// pruned transient failure while credits remain.
    fn run_resolution_step(
        &mut self,
        invocations: &[Invocation],
        max_retries: u32,
        workspace: &Path,
    ) -> Result<()> {
        'step: loop {
            for invocation in invocations {
                let output = self.execute(invocation)?;
                if output.success {
                    continue;
                }

                let attempts = self.retries_used + 1;
                let classification = self.classifier.classify(&output.output);
                let prune = match classification {
                    Classification::Fatal => {
                        tracing::debug!("`{}` failed fatally", invocation);
                        return Err(Error::ResolutionFailed {
                            attempts,
                            diagnostic: output.output,
                        });
                    }
                    Classification::Transient(_) if self.retries_used >= max_retries => {
                        tracing::warn!(
                            "`{}` failed transiently but the retry budget ({}) is spent",
                            invocation,
                            max_retries
                        );
                        return Err(Error::ResolutionFailed {
                            attempts,
                            diagnostic: output.output,
                        });
                    }
                    Classification::Transient(prune) => prune,
                };

                self.retries_used += 1;
                tracing::warn!(
                    "`{}` failed transiently; pruning {} and retrying ({}/{})",
                    invocation,
                    prune,
                    self.retries_used,
                    max_retries
                );
                self.prune(&prune, workspace);
                if let Some(cb) = self.callback {
                    cb.on_retry(self.retries_used, &prune);
                }
                self.abort.check()?;
                continue 'step;
            }
            return Ok(());
        }
    }

    fn compile(&self, config: &BuildConfig, workspace: &Path, artifact: &Path) -> Result<()> {
        let mut args = vec!["build".to_string()];
        args.extend(config.compile.build_args(config.debug));
        args.push("-o".to_string());
        args.push(artifact.to_string_lossy().into_owned());

        let invocation = Invocation::new(workspace, args).with_env(config.compile.env());
        let output = self.execute(&invocation)?;
        if !output.success {
            return Err(Error::CompileFailed {
                diagnostic: output.output,
            });
        }
        Ok(())
    }

    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.abort.check()?;
        tracing::info!("exec ({}): {}", invocation.cwd.display(), invocation);
        if let Some(cb) = self.callback {
            cb.on_command(invocation);
        }
        let output = self.toolchain.run(invocation, self.abort)?;
        if !output.output.is_empty() {
            tracing::debug!("{}", output.output.trim_end());
        }
        Ok(output)
    }

    fn prune(&self, prune: &Prune, workspace: &Path) {
        match prune {
            Prune::Nothing => {}
            Prune::SumFile => {
                let sum = workspace.join("go.sum");
                match fs::remove_file(&sum) {
                    Ok(()) => tracing::debug!("Removed {}", sum.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("Failed to remove {}: {}", sum.display(), e),
                }
            }
            Prune::CacheEntry { module, version } => match self.toolchain.module_cache() {
                Some(cache) => prune_cache_entry(&cache, module, version),
                None => tracing::warn!(
                    "Module cache location unknown; cannot prune {}@{}",
                    module,
                    version
                ),
            },
        }
    }
}

/// `go get` for the base program and each plugin.
///
/// Modules replaced by a local path are resolved from disk and need no fetch.
fn fetch_invocations(config: &BuildConfig, workspace: &Path) -> Vec<Invocation> {
    let env = config.compile.env();
    let get = |target: String| {
        let mut args = vec!["get".to_string()];
        args.extend(config.compile.mod_flags.iter().cloned());
        args.push("-v".to_string());
        args.push(target);
        Invocation::new(workspace, args).with_env(env.clone())
    };

    let mut invocations = Vec::new();
    if !replaced_locally(config, &config.base.module) {
        invocations.push(get(format!(
            "{}@{}",
            config.base.module,
            config.base_query()
        )));
    }
    for plugin in &config.plugins {
        if replaced_locally(config, &plugin.package_path) {
            tracing::debug!("Not fetching {}: replaced by a local path", plugin.package_path);
            continue;
        }
        invocations.push(get(plugin.to_string()));
    }
    invocations
}

fn tidy_invocation(config: &BuildConfig, workspace: &Path) -> Invocation {
    let mut args = vec!["mod".to_string(), "tidy".to_string()];
    args.extend(config.compile.mod_flags.iter().cloned());
    Invocation::new(workspace, args).with_env(config.compile.env())
}

/// Whether the module providing `package` is replaced by a filesystem path.
fn replaced_locally(config: &BuildConfig, package: &str) -> bool {
    config.replacements.iter().any(|replace| {
        let module = replace.old_module();
        replace.new.is_local()
            && (package == module
                || package
                    .strip_prefix(module)
                    .is_some_and(|rest| rest.starts_with('/')))
    })
}

/// Case-encode a module path the way the download cache stores it:
/// each uppercase letter becomes `!` followed by its lowercase form.
pub fn escape_module_path(module: &str) -> String {
    let mut out = String::with_capacity(module.len());
    for c in module.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Remove one module version from the download cache.
///
/// Deletes the downloaded archive and metadata as well as the extracted
/// tree, which the toolchain stores read-only.
fn prune_cache_entry(cache: &Path, module: &str, version: &str) {
    let escaped = escape_module_path(module);
    let escaped_version = escape_module_path(version);

    let download = cache
        .join("cache")
        .join("download")
        .join(&escaped)
        .join("@v");
    for ext in ["zip", "ziphash", "mod", "info", "lock"] {
        let file = download.join(format!("{escaped_version}.{ext}"));
        match fs::remove_file(&file) {
            Ok(()) => tracing::debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", file.display(), e),
        }
    }

    let extracted = cache.join(format!("{escaped}@{escaped_version}"));
    if extracted.exists() {
        make_writable(&extracted);
        if let Err(e) = fs::remove_dir_all(&extracted) {
            tracing::warn!("Failed to remove {}: {}", extracted.display(), e);
        }
    }
}

fn make_writable(path: &Path) {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return;
    };
    if metadata.file_type().is_symlink() {
        return;
    }

    let mut permissions = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o700);
    }
    #[cfg(not(unix))]
    permissions.set_readonly(false);
    let _ = fs::set_permissions(path, permissions);

    if !metadata.is_dir() {
        return;
    }
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            make_writable(&entry.path());
        }
    }
}
