//! Steps run on the finished artifact.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, bail};

/// Grant the artifact permission to bind privileged ports.
///
/// Runs `sudo setcap cap_net_bind_service=+ep <artifact>`. Linux only.
pub fn setcap(artifact: &Path) -> anyhow::Result<()> {
    if !cfg!(target_os = "linux") {
        tracing::warn!("Ignoring KILN_SETCAP: capabilities are only supported on Linux");
        return Ok(());
    }

    let sudo = which::which("sudo").context("KILN_SETCAP requires sudo")?;
    tracing::info!("Setting cap_net_bind_service on {}", artifact.display());
    let status = Command::new(sudo)
        .args(["setcap", "cap_net_bind_service=+ep"])
        .arg(artifact)
        .status()
        .context("Failed to run setcap")?;
    if !status.success() {
        bail!("setcap exited with {status}");
    }
    Ok(())
}

/// Run `<artifact> version` and return its first output line.
pub fn smoke_test(artifact: &Path) -> anyhow::Result<String> {
    let output = Command::new(artifact)
        .arg("version")
        .output()
        .with_context(|| format!("Failed to run {}", artifact.display()))?;
    if !output.status.success() {
        bail!(
            "{} version exited with {}:\n{}",
            artifact.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
