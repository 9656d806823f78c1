//! Target platform model, using the Go toolchain's `GOOS`/`GOARCH` names.

use std::fmt;

/// The OS/architecture a build targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// `GOOS` value, e.g. `linux`, `darwin`, `windows`.
    pub os: String,

    /// `GOARCH` value, e.g. `amd64`, `arm64`.
    pub arch: String,

    /// `GOARM` value, only meaningful for `arch == "arm"`.
    pub arm: Option<String>,
}

impl Target {
    /// A target from Go `GOOS` and `GOARCH` names.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            arm: None,
        }
    }

    /// The platform kiln itself is running on.
    pub fn host() -> Self {
        Self::new(go_os(std::env::consts::OS), go_arch(std::env::consts::ARCH))
    }

    /// Set the ARM version (`GOARM`).
    pub fn with_arm(mut self, arm: impl Into<String>) -> Self {
        self.arm = Some(arm.into());
        self
    }

    /// Whether binaries for this target can run on the host.
    pub fn is_host(&self) -> bool {
        let host = Self::host();
        self.os == host.os && self.arch == host.arch
    }

    /// Whether executables need an `.exe` suffix.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// File name for an executable called `stem` on this target.
    pub fn executable_name(&self, stem: &str) -> String {
        if self.is_windows() {
            format!("{stem}.exe")
        } else {
            stem.to_string()
        }
    }

    /// Default output file name for a binary called `stem`.
    ///
    /// Host builds get the plain name; cross builds are suffixed with the
    /// target so they never shadow a native binary.
    pub fn default_output_name(&self, stem: &str) -> String {
        if self.is_host() {
            self.executable_name(stem)
        } else {
            self.executable_name(&format!("{stem}_{}_{}", self.os, self.arch))
        }
    }

    /// Environment overrides for the compiler.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("GOOS".to_string(), self.os.clone()),
            ("GOARCH".to_string(), self.arch.clone()),
        ];
        if let Some(arm) = &self.arm {
            env.push(("GOARM".to_string(), arm.clone()));
        }
        env
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(arm) = &self.arm {
            write!(f, "/v{arm}")?;
        }
        Ok(())
    }
}

/// Map a Rust `std::env::consts::OS` value to its `GOOS` name.
fn go_os(os: &str) -> String {
    match os {
        "macos" => "darwin",
        other => other,
    }
    .to_string()
}

/// Map a Rust `std::env::consts::ARCH` value to its `GOARCH` name.
fn go_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        "wasm32" => "wasm",
        other => other,
    }
    .to_string()
}
