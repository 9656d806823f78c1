//! Build configuration.
//!
//! A [`BuildConfig`] is assembled once per invocation (typically by the CLI
//! from flags and environment) and consumed read-only by the [`Builder`].
//!
//! [`Builder`]: crate::Builder

use std::path::PathBuf;

use crate::directive::{Dependency, EmbedDir, Replace};
use crate::error::{Error, Result};
use crate::platform::Target;

/// Module path of the default base program.
pub const CADDY_MODULE: &str = "github.com/caddyserver/caddy/v2";

/// Default number of retries for transient resolution failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Function in the base program that receives embedded directories.
///
/// Called from the generated source as `pkg.Func(alias, fsys)` during init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedHook {
    /// Import path of the package that defines the function.
    pub package: String,
    /// Exported function name, with signature `func(string, fs.FS)`.
    pub func: String,
}

impl EmbedHook {
    /// Parse `import/path.Func`. The function must be exported.
    pub fn parse(spec: &str) -> Option<Self> {
        let (package, func) = spec.trim().rsplit_once('.')?;
        let mut chars = func.chars();
        let exported = chars.next().is_some_and(|c| c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if package.is_empty() || !exported {
            return None;
        }
        Some(Self {
            package: package.to_string(),
            func: func.to_string(),
        })
    }
}

/// How embedded directories are made reachable from the built program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EmbedRegistration {
    /// Register a `caddy.fs.embedded` filesystem module that serves each
    /// embedded tree by alias. Requires a Caddy-layout base.
    #[default]
    CaddyModule,

    /// Pass every tree to a function in the base program.
    Hook(EmbedHook),

    /// Compile the trees in without registering them anywhere.
    Unregistered,
}

/// The program every build starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseProgram {
    /// Module path, pinned to the requested version in the manifest.
    pub module: String,

    /// Package whose entry function runs the program.
    pub entry_package: String,

    /// Exported entry function in `entry_package`.
    pub entry_func: String,

    /// Packages always blank-imported before plugins.
    pub default_imports: Vec<String>,

    /// Stem of the produced executable.
    pub binary_name: String,

    /// How embedded directories are registered.
    pub embed_registration: EmbedRegistration,
}

impl BaseProgram {
    /// Caddy, the default base program.
    pub fn caddy() -> Self {
        Self::caddy_compatible(CADDY_MODULE)
    }

    /// A program laid out like Caddy (`<module>/cmd.Main`, standard modules),
    /// e.g. a fork published under another module path.
    pub fn caddy_compatible(module: impl Into<String>) -> Self {
        let module = module.into().trim_end_matches('/').to_string();
        Self {
            entry_package: format!("{module}/cmd"),
            entry_func: "Main".to_string(),
            default_imports: vec![format!("{module}/modules/standard")],
            binary_name: binary_stem(&module),
            embed_registration: EmbedRegistration::CaddyModule,
            module,
        }
    }
}

impl Default for BaseProgram {
    fn default() -> Self {
        Self::caddy()
    }
}

/// Options passed through to the compiler and resolver.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Target platform.
    pub target: Target,

    /// Build with cgo enabled.
    pub cgo: bool,

    /// Build with the race detector (requires cgo).
    pub race_detector: bool,

    /// Extra `go build` flags. When empty, symbols are stripped.
    pub build_flags: Vec<String>,

    /// Extra flags for `go get` and `go mod tidy`.
    pub mod_flags: Vec<String>,
}

impl CompileOptions {
    /// Arguments that follow `go build`, before the output flag.
    pub fn build_args(&self, debug: bool) -> Vec<String> {
        let mut args = Vec::new();
        if debug {
            args.extend(["-gcflags".to_string(), "all=-N -l".to_string()]);
        } else if self.build_flags.is_empty() {
            args.extend([
                "-ldflags".to_string(),
                "-w -s".to_string(),
                "-trimpath".to_string(),
            ]);
        }
        args.extend(self.build_flags.iter().cloned());
        if self.race_detector {
            args.push("-race".to_string());
        }
        args
    }

    /// Environment overrides for the compiler.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = self.target.env();
        let cgo = if self.cgo { "1" } else { "0" };
        env.push(("CGO_ENABLED".to_string(), cgo.to_string()));
        env
    }
}

/// Everything one build needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Program the plugins are linked into.
    pub base: BaseProgram,

    /// Version, branch, commit or `latest` for the base program.
    /// Empty means latest.
    pub base_version: String,

    /// Plugins, blank-imported in this order.
    pub plugins: Vec<Dependency>,

    /// Manifest replacements, written in this order.
    pub replacements: Vec<Replace>,

    /// Directories embedded into the binary.
    pub embeds: Vec<EmbedDir>,

    /// Compiler and resolver options.
    pub compile: CompileOptions,

    /// Retry budget for transient resolution failures.
    pub max_retries: u32,

    /// Stop after resolution and keep the workspace.
    pub skip_build: bool,

    /// Keep the workspace after the build.
    pub skip_cleanup: bool,

    /// Keep debug information and log generated files.
    pub debug: bool,

    /// Directory the caller invoked kiln from.
    pub working_dir: PathBuf,

    /// Parent directory for build workspaces (system temp dir if unset).
    pub temp_root: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base: BaseProgram::default(),
            base_version: String::new(),
            plugins: Vec::new(),
            replacements: Vec::new(),
            embeds: Vec::new(),
            compile: CompileOptions::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            skip_build: false,
            skip_cleanup: false,
            debug: false,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            temp_root: None,
        }
    }
}

impl BuildConfig {
    /// Create a configuration for the given base version.
    pub fn new(base_version: impl Into<String>) -> Self {
        Self {
            base_version: base_version.into(),
            ..Default::default()
        }
    }

    /// Build from a different base program.
    #[must_use]
    pub fn with_base(mut self, base: BaseProgram) -> Self {
        self.base = base;
        self
    }

    /// Link in a plugin after the ones already added.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Dependency) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Append a manifest replacement.
    #[must_use]
    pub fn with_replace(mut self, replace: Replace) -> Self {
        self.replacements.push(replace);
        self
    }

    /// Embed another directory.
    #[must_use]
    pub fn with_embed(mut self, embed: EmbedDir) -> Self {
        self.embeds.push(embed);
        self
    }

    /// Replace the compiler options.
    #[must_use]
    pub fn with_compile(mut self, compile: CompileOptions) -> Self {
        self.compile = compile;
        self
    }

    /// Directory relative paths are resolved against.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Create workspaces under `dir` instead of the system temp dir.
    #[must_use]
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// The base version as the resolver should see it.
    pub fn base_query(&self) -> &str {
        if self.base_version.is_empty() {
            "latest"
        } else {
            &self.base_version
        }
    }

    /// Default output path when the caller does not name one.
    pub fn default_output(&self) -> PathBuf {
        self.working_dir
            .join(self.compile.target.default_output_name(&self.base.binary_name))
    }

    /// Apply the implications between options.
    ///
    /// The race detector needs cgo, and a skipped build keeps its workspace.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.compile.race_detector && !self.compile.cgo {
            tracing::warn!("Enabling cgo because it is required by the race detector");
            self.compile.cgo = true;
        }
        if self.skip_build && !self.skip_cleanup {
            self.skip_cleanup = true;
        }
        self
    }
}

/// Split a flag string the way a POSIX shell would split words.
///
/// Supports single quotes, double quotes and backslash escapes.
pub fn split_flags(s: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(Error::invalid_directive(s, "unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => {
                                return Err(Error::invalid_directive(s, "unterminated double quote"));
                            }
                        },
                        Some(c) => current.push(c),
                        None => return Err(Error::invalid_directive(s, "unterminated double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Executable stem for a module path: last element, skipping `/vN` suffixes.
fn binary_stem(module: &str) -> String {
    module
        .rsplit('/')
        .find(|segment| {
            !(segment.len() > 1
                && segment.starts_with('v')
                && segment[1..].chars().all(|c| c.is_ascii_digit()))
        })
        .unwrap_or(module)
        .to_string()
}
