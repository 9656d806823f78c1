//! Build command implementation for kiln CLI.

use std::path::{Path, PathBuf};
use std::time::Instant;

use kiln_core::{
    BuildCallback, BuildConfig, Builder, GoToolchain, Invocation, Prune, Stage, parse_embed,
    parse_replace, parse_with,
};

use crate::colors;
use crate::env::BuildEnv;
use crate::post;

/// Result type for CLI operations.
pub type CliResult = anyhow::Result<()>;

/// Command-line inputs of `kiln build`.
#[derive(Debug, Default)]
pub struct BuildArgs {
    pub version: Option<String>,
    pub output: Option<PathBuf>,
    pub with: Vec<String>,
    pub replace: Vec<String>,
    pub embed: Vec<String>,
}

/// Prints pipeline progress to stdout.
struct Progress;

impl BuildCallback for Progress {
    fn on_stage(&self, stage: Stage) {
        let label = match stage {
            Stage::ManifestInitialized => "Workspace assembled",
            Stage::DependenciesFetched => "Dependencies fetched",
            Stage::DependenciesTidied => "Dependencies tidied",
            Stage::Compiled => "Compiled",
            Stage::Init | Stage::Done => return,
        };
        println!("{}  ◆ {}{}", colors::BLUE, label, colors::RESET);
    }

    fn on_command(&self, invocation: &Invocation) {
        println!("{}    $ {}{}", colors::DIM, invocation, colors::RESET);
        colors::flush_stdout();
    }

    fn on_retry(&self, retry: u32, prune: &Prune) {
        println!(
            "{}  ↻ Retrying ({}), pruned {}{}",
            colors::YELLOW,
            retry,
            prune,
            colors::RESET
        );
    }

    fn on_teardown(&self, workspace: &Path) {
        println!(
            "{}  ◆ Removed {}{}",
            colors::DIM,
            workspace.display(),
            colors::RESET
        );
    }
}

/// Turn the command-line directives into a configuration.
///
/// Directive errors surface here, before the toolchain is looked up.
pub fn resolve_config(args: &BuildArgs, env: &BuildEnv, cwd: &Path) -> anyhow::Result<BuildConfig> {
    let mut config =
        BuildConfig::new(env.base_version(args.version.clone())).with_working_dir(cwd);

    for raw in &args.with {
        let with = parse_with(raw)?;
        if let Some(replace) = with.replace(cwd) {
            config = config.with_replace(replace);
        }
        config = config.with_plugin(with.dependency);
    }
    for raw in &args.replace {
        config = config.with_replace(parse_replace(raw, cwd)?);
    }
    for raw in &args.embed {
        config = config.with_embed(parse_embed(raw)?);
    }

    env.apply(config)
}

/// Build a custom binary.
pub async fn execute(args: BuildArgs) -> CliResult {
    let start = Instant::now();
    let cwd = std::env::current_dir()?;
    let env = BuildEnv::from_env();
    let config = resolve_config(&args, &env, &cwd)?;

    let toolchain = GoToolchain::new()?;
    println!(
        "\n{}kiln{} - Building {}{}@{}{} for {} ({})\n",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        config.base.module,
        config.base_query(),
        colors::RESET,
        config.compile.target,
        toolchain.version()
    );
    for plugin in &config.plugins {
        println!("{}  + {}{}", colors::DIM, plugin, colors::RESET);
    }

    let target = config.compile.target.clone();
    let builder = Builder::new(config, toolchain).with_callback(Progress);

    let abort = builder.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping build");
            abort.abort();
        }
    });

    let output = args.output;
    let result = tokio::task::spawn_blocking(move || builder.build(output.as_deref())).await;
    interrupt.abort();
    let outcome = result??;

    println!();
    let Some(artifact) = outcome.artifact else {
        println!(
            "{}Resolved:{} workspace kept at {}",
            colors::GREEN,
            colors::RESET,
            outcome.workspace.display()
        );
        return Ok(());
    };

    if env.setcap {
        post::setcap(&artifact)?;
    }
    if target.is_host() {
        let version = post::smoke_test(&artifact)?;
        println!("{}Version:{} {}", colors::DIM, colors::RESET, version);
    } else {
        tracing::debug!("Not running {}: built for {}", artifact.display(), target);
    }

    println!(
        "{}Built:{} {}",
        colors::GREEN,
        colors::RESET,
        artifact.display()
    );
    if outcome.retries_used > 0 {
        println!(
            "{}Retries:{} {}",
            colors::DIM,
            colors::RESET,
            outcome.retries_used
        );
    }
    if outcome.workspace_kept {
        println!(
            "{}Workspace:{} {}",
            colors::DIM,
            colors::RESET,
            outcome.workspace.display()
        );
    }
    println!(
        "{}Time:{} {:.2}s",
        colors::DIM,
        colors::RESET,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_replacement_adds_plugin_and_replace() {
        let args = BuildArgs {
            with: vec![
                "github.com/x/y@v1.0.0=../y".to_string(),
                "github.com/a/b/".to_string(),
            ],
            ..Default::default()
        };
        let config = resolve_config(&args, &BuildEnv::default(), Path::new("/work/site")).unwrap();

        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[1].package_path, "github.com/a/b");
        assert_eq!(config.replacements.len(), 1);
        assert_eq!(config.replacements[0].old, "github.com/x/y@v1.0.0");
        assert_eq!(config.replacements[0].new.as_str(), "/work/y");
    }

    #[test]
    fn test_replace_requires_right_side() {
        let args = BuildArgs {
            replace: vec!["github.com/x/y".to_string()],
            ..Default::default()
        };
        assert!(resolve_config(&args, &BuildEnv::default(), Path::new("/work")).is_err());
    }

    #[test]
    fn test_embed_directives() {
        let args = BuildArgs {
            version: Some("v2.7.0".to_string()),
            embed: vec!["all:www:/srv/site".to_string()],
            ..Default::default()
        };
        let config = resolve_config(&args, &BuildEnv::default(), Path::new("/work")).unwrap();

        assert_eq!(config.base_version, "v2.7.0");
        assert_eq!(config.embeds[0].name, "www");
        assert!(config.embeds[0].include_all);
    }
}
