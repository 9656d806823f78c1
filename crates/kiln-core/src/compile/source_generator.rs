//! Entry-point source generation.
//!
//! Plugins register themselves from package `init` functions, so linking
//! one in only takes a blank import. The generated `main.go` blank-imports
//! each plugin and then hands control to the base program's entry function;
//! `embedded.go` carries one `//go:embed` variable per embedded directory
//! and registers the trees with the base program.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::{BuildConfig, EmbedRegistration};
use crate::directive::{EmbedDir, absolutize};

use super::gomod_generator::go_string_literal;

/// Directory inside the workspace that embedded trees are copied into.
pub const EMBED_ROOT: &str = "embedded";

/// Import alias for the base program's entry package.
const ENTRY_ALIAS: &str = "basecmd";

/// Import alias for the package receiving embedded directories.
const HOOK_ALIAS: &str = "embedhook";

/// One embedded directory, bound to a generated variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedBinding {
    /// Package-level variable name, unique within `embedded.go`.
    pub var_name: String,

    /// Workspace-relative directory the tree is copied to.
    pub workspace_dir: String,

    /// Absolute source directory on the caller's machine.
    pub source: PathBuf,

    /// Alias the directory is registered under (may be empty).
    pub alias: String,

    /// Embed dot-files and `_`-prefixed files too.
    pub include_all: bool,
}

/// Assign unique variable names and workspace locations to the embeds.
///
/// Names are derived from the alias and made unique case-insensitively, so
/// the copied directories cannot collide on case-insensitive filesystems.
pub fn plan_embeds(config: &BuildConfig) -> Vec<EmbedBinding> {
    let mut taken = HashSet::new();
    config
        .embeds
        .iter()
        .map(|embed| bind_embed(embed, config, &mut taken))
        .collect()
}

fn bind_embed(embed: &EmbedDir, config: &BuildConfig, taken: &mut HashSet<String>) -> EmbedBinding {
    let stem = format!("embedded{}", camel_case(&embed.name));
    let mut var_name = stem.clone();
    let mut suffix = 2;
    while !taken.insert(var_name.to_lowercase()) {
        var_name = format!("{stem}{suffix}");
        suffix += 1;
    }

    EmbedBinding {
        workspace_dir: format!("{EMBED_ROOT}/{}", var_name.to_lowercase()),
        source: absolutize(&config.working_dir, std::path::Path::new(&embed.dir)),
        alias: embed.name.clone(),
        include_all: embed.include_all,
        var_name,
    }
}

/// `my-site` → `MySite`; anything without letters or digits → `Dir`.
fn camel_case(alias: &str) -> String {
    let mut out = String::new();
    for word in alias.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() {
        out.push_str("Dir");
    }
    out
}

/// Generate `main.go`.
pub fn generate_main_go(config: &BuildConfig) -> String {
    let base = &config.base;
    let mut code = String::new();

    code.push_str("// Code generated by kiln. DO NOT EDIT.\n");
    code.push_str("//\n");
    code.push_str(&format!("// Base: {}@{}\n", base.module, config.base_query()));
    code.push('\n');
    code.push_str("package main\n\n");

    code.push_str("import (\n");
    code.push_str(&format!(
        "\t{ENTRY_ALIAS} {}\n",
        go_string_literal(&base.entry_package)
    ));

    let mut seen: HashSet<&str> = HashSet::from([base.entry_package.as_str()]);
    let imports: Vec<&str> = base
        .default_imports
        .iter()
        .map(String::as_str)
        .chain(config.plugins.iter().map(|p| p.package_path.as_str()))
        .filter(|path| seen.insert(path))
        .collect();

    if !imports.is_empty() {
        code.push('\n');
        code.push_str("\t// plugins register themselves when imported\n");
        for path in imports {
            code.push_str(&format!("\t_ {}\n", go_string_literal(path)));
        }
    }
    code.push_str(")\n\n");

    code.push_str("func main() {\n");
    code.push_str(&format!("\t{ENTRY_ALIAS}.{}()\n", base.entry_func));
    code.push_str("}\n");

    code
}

/// Generate `embedded.go`, or `None` when nothing is embedded.
///
/// Generated helpers carry a `kiln` prefix, which the `embedded…` variable
/// names of [`plan_embeds`] can never produce.
pub fn generate_embedded_go(config: &BuildConfig, bindings: &[EmbedBinding]) -> Option<String> {
    if bindings.is_empty() {
        return None;
    }

    let registration = &config.base.embed_registration;
    let mut code = String::new();

    code.push_str("// Code generated by kiln. DO NOT EDIT.\n\n");
    code.push_str("package main\n\n");
    code.push_str("import (\n");
    code.push_str("\t\"embed\"\n");
    if matches!(registration, EmbedRegistration::CaddyModule) {
        code.push_str("\t\"fmt\"\n");
    }
    code.push_str("\t\"io/fs\"\n");
    match registration {
        EmbedRegistration::CaddyModule => {
            let module = &config.base.module;
            code.push('\n');
            code.push_str(&format!("\tcaddy {}\n", go_string_literal(module)));
            code.push_str(&format!(
                "\tcaddyfile {}\n",
                go_string_literal(&format!("{module}/caddyconfig/caddyfile"))
            ));
        }
        EmbedRegistration::Hook(hook) => {
            code.push_str(&format!("\n\t{HOOK_ALIAS} {}\n", go_string_literal(&hook.package)));
        }
        EmbedRegistration::Unregistered => {}
    }
    code.push_str(")\n");

    for binding in bindings {
        let pattern = if binding.include_all {
            format!("all:{}", binding.workspace_dir)
        } else {
            binding.workspace_dir.clone()
        };
        code.push('\n');
        code.push_str(&format!(
            "// {}: {}\n",
            comment_text(display_alias(&binding.alias)),
            comment_text(&binding.source.display().to_string())
        ));
        code.push_str("//\n");
        code.push_str(&format!("//go:embed {pattern}\n"));
        code.push_str(&format!("var {} embed.FS\n", binding.var_name));
    }

    code.push_str("\n// kilnEmbeddedDirs lists the embedded trees in command-line order.\n");
    code.push_str("var kilnEmbeddedDirs = []struct {\n\tName string\n\tFS   fs.FS\n}{\n");
    for binding in bindings {
        code.push_str(&format!(
            "\t{{{}, kilnEmbedSub({}, {})}},\n",
            go_string_literal(&binding.alias),
            binding.var_name,
            go_string_literal(&binding.workspace_dir)
        ));
    }
    code.push_str("}\n\n");

    code.push_str("func kilnEmbedSub(fsys embed.FS, dir string) fs.FS {\n");
    code.push_str("\tsub, err := fs.Sub(fsys, dir)\n");
    code.push_str("\tif err != nil {\n\t\tpanic(err)\n\t}\n");
    code.push_str("\treturn sub\n");
    code.push_str("}\n");

    match registration {
        EmbedRegistration::CaddyModule => code.push_str(CADDY_FS_MODULE),
        EmbedRegistration::Hook(hook) => {
            code.push_str("\nfunc init() {\n");
            code.push_str("\tfor _, dir := range kilnEmbeddedDirs {\n");
            code.push_str(&format!("\t\t{HOOK_ALIAS}.{}(dir.Name, dir.FS)\n", hook.func));
            code.push_str("\t}\n");
            code.push_str("}\n");
        }
        EmbedRegistration::Unregistered => {}
    }

    Some(code)
}

/// A `caddy.fs.embedded` module serving the tree whose alias matches its
/// `alias` field. In a Caddyfile: `filesystem site embedded www`.
const CADDY_FS_MODULE: &str = r#"
func init() {
	caddy.RegisterModule(kilnEmbeddedFS{})
}

// kilnEmbeddedFS serves one embedded directory, selected by alias.
type kilnEmbeddedFS struct {
	Alias string `json:"alias,omitempty"`

	fsys fs.FS
}

func (kilnEmbeddedFS) CaddyModule() caddy.ModuleInfo {
	return caddy.ModuleInfo{
		ID:  "caddy.fs.embedded",
		New: func() caddy.Module { return new(kilnEmbeddedFS) },
	}
}

func (e *kilnEmbeddedFS) Provision(caddy.Context) error {
	for _, dir := range kilnEmbeddedDirs {
		if dir.Name == e.Alias {
			e.fsys = dir.FS
			return nil
		}
	}
	return fmt.Errorf("no embedded directory with alias %q", e.Alias)
}

func (e *kilnEmbeddedFS) Open(name string) (fs.File, error) {
	return e.fsys.Open(name)
}

func (e *kilnEmbeddedFS) UnmarshalCaddyfile(d *caddyfile.Dispenser) error {
	d.Next() // module name
	if d.NextArg() {
		e.Alias = d.Val()
	}
	if d.NextArg() {
		return d.ArgErr()
	}
	return nil
}

var (
	_ fs.FS                 = (*kilnEmbeddedFS)(nil)
	_ caddy.Provisioner     = (*kilnEmbeddedFS)(nil)
	_ caddyfile.Unmarshaler = (*kilnEmbeddedFS)(nil)
)
"#;

fn display_alias(alias: &str) -> &str {
    if alias.is_empty() { "(no alias)" } else { alias }
}

/// Text that is safe inside a `//` comment: no line breaks or other controls.
fn comment_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaseProgram, EmbedHook};
    use crate::directive::Dependency;

    fn embed(name: &str, dir: &str) -> EmbedDir {
        EmbedDir {
            dir: dir.to_string(),
            name: name.to_string(),
            include_all: false,
        }
    }

    #[test]
    fn test_main_go_base_only() {
        let code = generate_main_go(&BuildConfig::new("v2.7.0"));

        assert!(code.contains("package main\n"));
        assert!(code.contains("\tbasecmd \"github.com/caddyserver/caddy/v2/cmd\"\n"));
        assert!(code.contains("\t_ \"github.com/caddyserver/caddy/v2/modules/standard\"\n"));
        assert!(code.contains("func main() {\n\tbasecmd.Main()\n}\n"));
    }

    #[test]
    fn test_main_go_without_any_blank_imports() {
        let mut config = BuildConfig::new("v1.0.0");
        config.base.default_imports.clear();
        let code = generate_main_go(&config);

        assert!(!code.contains("_ \""));
        assert!(!code.contains("register themselves"));
        assert!(code.contains("basecmd.Main()"));
    }

    #[test]
    fn test_main_go_plugin_order_and_dedup() {
        let config = BuildConfig::new("v2.7.0")
            .with_plugin(Dependency::new("example.com/b", ""))
            .with_plugin(Dependency::new("example.com/a", "v1.0.0"))
            .with_plugin(Dependency::new("example.com/b", "v2.0.0"));
        let code = generate_main_go(&config);

        let b = code.find("_ \"example.com/b\"").unwrap();
        let a = code.find("_ \"example.com/a\"").unwrap();
        assert!(b < a);
        assert_eq!(code.matches("_ \"example.com/b\"").count(), 1);
    }

    #[test]
    fn test_embed_names_are_unique() {
        let config = BuildConfig::new("v2.7.0")
            .with_working_dir("/work")
            .with_embed(embed("www", "/srv/a"))
            .with_embed(embed("www", "/srv/b"))
            .with_embed(embed("", "site"))
            .with_embed(embed("", "other"))
            .with_embed(embed("WWW", "/srv/c"));
        let bindings = plan_embeds(&config);

        let names: Vec<_> = bindings.iter().map(|b| b.var_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["embeddedWww", "embeddedWww2", "embeddedDir", "embeddedDir2", "embeddedWWW3"]
        );
        assert_eq!(bindings[2].source, PathBuf::from("/work/site"));
        assert_eq!(bindings[0].workspace_dir, "embedded/embeddedwww");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("my-site"), "MySite");
        assert_eq!(camel_case("a.b_c"), "ABC");
        assert_eq!(camel_case("???"), "Dir");
    }

    #[test]
    fn test_embedded_go_registers_caddy_filesystem() {
        let config = BuildConfig::new("v2.7.0").with_embed(EmbedDir {
            dir: "/srv/site".to_string(),
            name: "www".to_string(),
            include_all: true,
        });
        let bindings = plan_embeds(&config);
        let code = generate_embedded_go(&config, &bindings).unwrap();

        assert!(code.contains("// www: /srv/site\n//\n//go:embed all:embedded/embeddedwww\nvar embeddedWww embed.FS\n"));
        assert!(code.contains("\t{\"www\", kilnEmbedSub(embeddedWww, \"embedded/embeddedwww\")},\n"));
        assert!(code.contains("\tcaddy \"github.com/caddyserver/caddy/v2\"\n"));
        assert!(code.contains("\tcaddyfile \"github.com/caddyserver/caddy/v2/caddyconfig/caddyfile\"\n"));
        assert!(code.contains("caddy.RegisterModule(kilnEmbeddedFS{})"));
        assert!(code.contains("ID:  \"caddy.fs.embedded\""));
        assert!(code.contains("range kilnEmbeddedDirs"));
        assert!(!code.contains("embedhook"));
    }

    #[test]
    fn test_caddy_filesystem_follows_forked_base() {
        let config = BuildConfig::new("v2.7.0")
            .with_base(BaseProgram::caddy_compatible("github.com/fork/caddy/v2"))
            .with_embed(embed("", "site"));
        let code = generate_embedded_go(&config, &plan_embeds(&config)).unwrap();

        assert!(code.contains("\tcaddy \"github.com/fork/caddy/v2\"\n"));
        assert!(code.contains("\tcaddyfile \"github.com/fork/caddy/v2/caddyconfig/caddyfile\"\n"));
        assert!(code.contains("\t{\"\", kilnEmbedSub(embeddedDir, \"embedded/embeddeddir\")},\n"));
    }

    #[test]
    fn test_embedded_go_with_hook() {
        let mut config = BuildConfig::new("v2.7.0").with_embed(embed("www", "/srv/site"));
        config.base.embed_registration = EmbedRegistration::Hook(EmbedHook {
            package: "example.com/base/files".to_string(),
            func: "Register".to_string(),
        });
        let code = generate_embedded_go(&config, &plan_embeds(&config)).unwrap();

        assert!(code.contains("embedhook \"example.com/base/files\""));
        assert!(code.contains("embedhook.Register(dir.Name, dir.FS)"));
        assert!(!code.contains("RegisterModule"));
        assert!(!code.contains("\"fmt\""));
    }

    #[test]
    fn test_embedded_go_unregistered() {
        let mut config = BuildConfig::new("v2.7.0").with_embed(embed("www", "/srv/site"));
        config.base.embed_registration = EmbedRegistration::Unregistered;
        let code = generate_embedded_go(&config, &plan_embeds(&config)).unwrap();

        assert!(code.contains("var embeddedWww embed.FS"));
        assert!(!code.contains("func init()"));
        assert!(!code.contains("caddy"));
    }

    #[test]
    fn test_aliases_matching_helper_names() {
        let config = BuildConfig::new("v2.7.0")
            .with_embed(embed("dirs", "/srv/a"))
            .with_embed(embed("sub", "/srv/b"))
            .with_embed(embed("Dirs", "/srv/c"))
            .with_embed(embed("SUB", "/srv/d"))
            .with_embed(embed("fs", "/srv/e"));
        let bindings = plan_embeds(&config);
        let code = generate_embedded_go(&config, &bindings).unwrap();

        let names: Vec<_> = bindings.iter().map(|b| b.var_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["embeddedDirs", "embeddedSub", "embeddedDirs2", "embeddedSUB2", "embeddedFs"]
        );
        for name in &names {
            assert_eq!(code.matches(&format!("var {name} ")).count(), 1, "{name}");
        }
        assert_eq!(code.matches("var kilnEmbeddedDirs ").count(), 1);
        assert_eq!(code.matches("func kilnEmbedSub(").count(), 1);
        assert_eq!(code.matches("type kilnEmbeddedFS ").count(), 1);
    }

    #[test]
    fn test_control_characters_are_go_escaped() {
        let config = BuildConfig::new("v2.7.0").with_embed(embed("a\u{1b}b\nc", "/srv/site"));
        let code = generate_embedded_go(&config, &plan_embeds(&config)).unwrap();

        assert!(code.contains(r#"{"a\x1bb\nc", kilnEmbedSub("#));
        assert!(code.contains("// a?b?c: /srv/site\n"));
        assert!(!code.contains('\u{1b}'));
        assert!(!code.contains("\\u{1b}"));
    }

    #[test]
    fn test_no_embedded_go_without_embeds() {
        let config = BuildConfig::new("v2.7.0");
        assert!(generate_embedded_go(&config, &plan_embeds(&config)).is_none());
    }
}
