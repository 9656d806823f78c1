//! Environment-variable defaults for the build command.
//!
//! The environment is read once into a [`BuildEnv`] snapshot and layered
//! under the command-line flags by [`BuildEnv::apply`].

use anyhow::Context;
use kiln_core::{BaseProgram, BuildConfig, EmbedHook, EmbedRegistration, Target, split_flags};

/// Build-relevant environment variables, captured at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    pub base_version: Option<String>,
    pub base_module: Option<String>,
    pub embed_hook: Option<String>,
    pub skip_build: bool,
    pub skip_cleanup: bool,
    pub debug: bool,
    pub race_detector: bool,
    pub setcap: bool,
    pub go_build_flags: Option<String>,
    pub go_mod_flags: Option<String>,
    pub max_retries: Option<String>,
    pub cgo: bool,
    pub goos: Option<String>,
    pub goarch: Option<String>,
    pub goarm: Option<String>,
}

impl BuildEnv {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Snapshot variables from an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| value(key).is_some_and(|v| is_truthy(&v));

        Self {
            base_version: value("KILN_BASE_VERSION"),
            base_module: value("KILN_BASE_MODULE"),
            embed_hook: value("KILN_EMBED_HOOK"),
            skip_build: flag("KILN_SKIP_BUILD"),
            skip_cleanup: flag("KILN_SKIP_CLEANUP"),
            debug: flag("KILN_DEBUG"),
            race_detector: flag("KILN_RACE_DETECTOR"),
            setcap: flag("KILN_SETCAP"),
            go_build_flags: value("KILN_GO_BUILD_FLAGS"),
            go_mod_flags: value("KILN_GO_MOD_FLAGS"),
            max_retries: value("KILN_MAX_RETRIES"),
            cgo: flag("CGO_ENABLED"),
            goos: value("GOOS"),
            goarch: value("GOARCH"),
            goarm: value("GOARM"),
        }
    }

    /// Base version from the command line, falling back to the environment.
    pub fn base_version(&self, arg: Option<String>) -> String {
        arg.or_else(|| self.base_version.clone()).unwrap_or_default()
    }

    /// The platform to build for. Unset parts default to the host.
    pub fn target(&self) -> Target {
        let host = Target::host();
        let mut target = Target::new(
            self.goos.clone().unwrap_or(host.os),
            self.goarch.clone().unwrap_or(host.arch),
        );
        if let Some(arm) = &self.goarm {
            target = target.with_arm(arm.clone());
        }
        target
    }

    /// Layer the environment onto `config`.
    pub fn apply(&self, mut config: BuildConfig) -> anyhow::Result<BuildConfig> {
        if let Some(module) = &self.base_module {
            config = config.with_base(BaseProgram::caddy_compatible(module.clone()));
        }
        if let Some(spec) = &self.embed_hook {
            let hook = EmbedHook::parse(spec).with_context(|| {
                format!("Invalid KILN_EMBED_HOOK '{spec}' (expected import/path.Func)")
            })?;
            config.base.embed_registration = EmbedRegistration::Hook(hook);
        }

        config.skip_build |= self.skip_build;
        config.skip_cleanup |= self.skip_cleanup;
        config.debug |= self.debug;
        config.compile.race_detector |= self.race_detector;
        config.compile.cgo |= self.cgo;
        config.compile.target = self.target();

        if let Some(flags) = &self.go_build_flags {
            config.compile.build_flags =
                split_flags(flags).context("Invalid KILN_GO_BUILD_FLAGS")?;
        }
        if let Some(flags) = &self.go_mod_flags {
            config.compile.mod_flags = split_flags(flags).context("Invalid KILN_GO_MOD_FLAGS")?;
        }
        if let Some(retries) = &self.max_retries {
            config.max_retries = retries
                .trim()
                .parse()
                .with_context(|| format!("Invalid KILN_MAX_RETRIES '{retries}'"))?;
        }

        Ok(config)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> BuildEnv {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BuildEnv::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_empty_env_changes_nothing() {
        let config = env(&[]).apply(BuildConfig::new("v2.7.0")).unwrap();
        assert_eq!(config, BuildConfig::new("v2.7.0"));
    }

    #[test]
    fn test_flags_and_toggles() {
        let config = env(&[
            ("KILN_SKIP_CLEANUP", "1"),
            ("KILN_RACE_DETECTOR", "true"),
            ("KILN_DEBUG", "0"),
            ("KILN_GO_BUILD_FLAGS", "-tags 'nobadger nomysql'"),
            ("KILN_GO_MOD_FLAGS", "-mod=mod"),
            ("KILN_MAX_RETRIES", "5"),
        ])
        .apply(BuildConfig::default())
        .unwrap();

        assert!(config.skip_cleanup);
        assert!(config.compile.race_detector);
        assert!(!config.debug);
        assert_eq!(config.compile.build_flags, vec!["-tags", "nobadger nomysql"]);
        assert_eq!(config.compile.mod_flags, vec!["-mod=mod"]);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_invalid_retries() {
        let err = env(&[("KILN_MAX_RETRIES", "many")])
            .apply(BuildConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("KILN_MAX_RETRIES"));
    }

    #[test]
    fn test_target_from_env() {
        let target = env(&[("GOOS", "linux"), ("GOARCH", "arm"), ("GOARM", "7")]).target();
        assert_eq!(target.to_string(), "linux/arm/v7");
        assert_eq!(env(&[]).target(), Target::host());
    }

    #[test]
    fn test_base_version_precedence() {
        let e = env(&[("KILN_BASE_VERSION", "v2.6.4")]);
        assert_eq!(e.base_version(Some("v2.7.0".to_string())), "v2.7.0");
        assert_eq!(e.base_version(None), "v2.6.4");
        assert_eq!(env(&[]).base_version(None), "");
    }

    #[test]
    fn test_base_module_override() {
        let config = env(&[("KILN_BASE_MODULE", "github.com/fork/caddy/v2")])
            .apply(BuildConfig::default())
            .unwrap();
        assert_eq!(config.base.module, "github.com/fork/caddy/v2");
        assert_eq!(config.base.entry_package, "github.com/fork/caddy/v2/cmd");
    }

    #[test]
    fn test_embed_hook_from_env() {
        let config = env(&[
            ("KILN_BASE_MODULE", "github.com/fork/caddy/v2"),
            ("KILN_EMBED_HOOK", "github.com/fork/caddy/v2/files.Register"),
        ])
        .apply(BuildConfig::default())
        .unwrap();
        assert_eq!(
            config.base.embed_registration,
            EmbedRegistration::Hook(EmbedHook {
                package: "github.com/fork/caddy/v2/files".to_string(),
                func: "Register".to_string(),
            })
        );

        let default = env(&[]).apply(BuildConfig::default()).unwrap();
        assert_eq!(default.base.embed_registration, EmbedRegistration::CaddyModule);
    }

    #[test]
    fn test_invalid_embed_hook() {
        let err = env(&[("KILN_EMBED_HOOK", "register")])
            .apply(BuildConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("KILN_EMBED_HOOK"));
    }
}
