//! `go.mod` manifest generation.

use crate::config::BuildConfig;
use crate::directive::Replace;

/// Module path of the generated main module.
pub const MAIN_MODULE: &str = "kiln.build/custom";

/// Whether `version` can be written verbatim into a `require` line.
///
/// Branch names, commit hashes and `latest` are queries the resolver has to
/// turn into a version first; those are pinned by the fetch step instead.
pub fn is_canonical_version(version: &str) -> bool {
    version
        .strip_prefix('v')
        .is_some_and(|v| semver::Version::parse(v).is_ok())
}

/// Generate the `go.mod` for a build.
///
/// Lists the base program and every plugin pinned to a canonical version,
/// followed by one `replace` line per replacement.
pub fn generate_go_mod(config: &BuildConfig) -> String {
    let mut gomod = String::new();

    gomod.push_str("// Code generated by kiln. DO NOT EDIT.\n\n");
    gomod.push_str(&format!("module {MAIN_MODULE}\n"));

    let mut requires: Vec<(&str, &str)> = Vec::new();
    if is_canonical_version(&config.base_version) {
        requires.push((config.base.module.as_str(), config.base_version.as_str()));
    }
    for plugin in &config.plugins {
        if is_canonical_version(&plugin.version)
            && !requires.iter().any(|(path, _)| *path == plugin.package_path)
        {
            requires.push((plugin.package_path.as_str(), plugin.version.as_str()));
        }
    }

    if !requires.is_empty() {
        gomod.push_str("\nrequire (\n");
        for (path, version) in &requires {
            gomod.push_str(&format!("\t{} {}\n", quote(path), quote(version)));
        }
        gomod.push_str(")\n");
    }

    if !config.replacements.is_empty() {
        gomod.push('\n');
        for replace in &config.replacements {
            gomod.push_str(&format_replace(replace));
            gomod.push('\n');
        }
    }

    gomod
}

/// Format one `replace` line.
///
/// The right-hand side comes from [`ReplacementPath::param`]; module
/// references in `module@version` form are written as `module version`.
///
/// [`ReplacementPath::param`]: crate::directive::ReplacementPath::param
pub fn format_replace(replace: &Replace) -> String {
    let old = module_operand(&replace.old);
    let param = replace.new.param();
    let new = if replace.new.is_local() {
        quote(&param)
    } else {
        module_operand(&param)
    };
    format!("replace {old} => {new}")
}

/// `path@version` becomes `path version`; a bare path is kept.
fn module_operand(reference: &str) -> String {
    match reference.rsplit_once('@') {
        Some((path, version)) if !version.is_empty() => {
            format!("{} {}", quote(path), quote(version))
        }
        Some((path, _)) => quote(path),
        None => quote(reference),
    }
}

/// Quote a token if `go.mod` syntax requires it.
fn quote(token: &str) -> String {
    let needs_quotes = token.is_empty()
        || token.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '`' | '(' | ')' | '\\')
        });
    if needs_quotes {
        go_string_literal(token)
    } else {
        token.to_string()
    }
}

/// Render `s` as a double-quoted Go string literal.
///
/// Shared by `go.mod` and the generated Go sources. Control characters are
/// written as Go `\xNN` or `\uNNNN` escapes.
pub(crate) fn go_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Dependency;

    #[test]
    fn test_canonical_versions() {
        assert!(is_canonical_version("v2.7.0"));
        assert!(is_canonical_version("v0.0.0-20200101000000-abcdefabcdef"));
        assert!(is_canonical_version("v2.0.0+incompatible"));
        assert!(!is_canonical_version(""));
        assert!(!is_canonical_version("latest"));
        assert!(!is_canonical_version("master"));
        assert!(!is_canonical_version("a58f240d3ecbb59285303746406cab50217f8d24"));
        assert!(!is_canonical_version("2.7.0"));
    }

    #[test]
    fn test_requires_base_and_plugins() {
        let config = BuildConfig::new("v2.7.0")
            .with_plugin(Dependency::new("example.com/mod", "v1.0.0"))
            .with_plugin(Dependency::new("example.com/latest", ""))
            .with_plugin(Dependency::new("example.com/branch", "main"));
        let gomod = generate_go_mod(&config);

        assert!(gomod.contains("module kiln.build/custom\n"));
        assert!(gomod.contains("\tgithub.com/caddyserver/caddy/v2 v2.7.0\n"));
        assert!(gomod.contains("\texample.com/mod v1.0.0\n"));
        assert!(!gomod.contains("example.com/latest"));
        assert!(!gomod.contains("example.com/branch"));
        assert!(!gomod.contains("replace"));
    }

    #[test]
    fn test_no_require_block_for_unpinned_build() {
        let gomod = generate_go_mod(&BuildConfig::new("latest"));
        assert!(!gomod.contains("require"));
    }

    #[test]
    fn test_replace_lines_preserve_order() {
        let config = BuildConfig::new("v2.7.0")
            .with_replace(Replace::new("github.com/a/b@v1.0.0", "/src/b"))
            .with_replace(Replace::new("github.com/c/d", "github.com/fork/d v1.2.0"))
            .with_replace(Replace::new("github.com/e/f", "/home/me/my plugin"));
        let gomod = generate_go_mod(&config);

        let a = gomod.find("replace github.com/a/b v1.0.0 => /src/b").unwrap();
        let c = gomod.find("replace github.com/c/d => github.com/fork/d v1.2.0").unwrap();
        let e = gomod
            .find("replace github.com/e/f => \"/home/me/my plugin\"")
            .unwrap();
        assert!(a < c && c < e);
    }

    #[test]
    fn test_go_string_literal_escapes() {
        assert_eq!(go_string_literal("plain"), "\"plain\"");
        assert_eq!(go_string_literal(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(go_string_literal("tab\tnl\n"), r#""tab\tnl\n""#);
        assert_eq!(go_string_literal("esc\u{1b}[0m"), r#""esc\x1b[0m""#);
        assert_eq!(go_string_literal("c1\u{85}"), r#""c1\u0085""#);
        assert_eq!(go_string_literal("ünï"), "\"ünï\"");
    }

    #[test]
    fn test_control_characters_in_replace_path() {
        let config = BuildConfig::new("v2.7.0")
            .with_replace(Replace::new("github.com/e/f", "/src/odd\u{1b}name"));
        let gomod = generate_go_mod(&config);

        assert!(gomod.contains(r#"replace github.com/e/f => "/src/odd\x1bname""#));
        assert!(!gomod.contains("\\u{1b}"));
    }
}
