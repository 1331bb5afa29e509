//! Builds the AWS-patched OpenVPN client from upstream source.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error, info};

use crate::error::{AppError, Result};

pub const OPENVPN_SOURCE_FOLDER: &str = "openvpn-2.5.1";
pub const OPENVPN_TAR_NAME: &str = "openvpn-2.5.1.tar.xz";
pub const OPENVPN_SOURCE_URL: &str = "https://swupdate.openvpn.org/community/releases/openvpn-2.5.1.tar.xz";
pub const DEFAULT_PATCH: &str = "scripts/openvpn-v2.5.1-aws.patch";
pub const DIST_BINARY: &str = "openvpn_aws";

const REQUIRED_TOOLS: &[&str] = &["make", "patch", "wget", "tar"];

const CONFIGURE_OPTIONS: &[&str] = &[
    "--disable-debug",
    "--disable-dependency-tracking",
    "--disable-silent-rules",
    "--with-crypto-library=openssl",
];

#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Existing source tree; downloaded into the temp dir when absent.
    pub source: Option<PathBuf>,
    pub out: PathBuf,
    pub patch: PathBuf,
}

/// Whether `name` resolves to an executable on `PATH`.
pub fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Names from `tools` that are not installed.
pub fn missing_tools<'a>(tools: &[&'a str], exists: impl Fn(&str) -> bool) -> Vec<&'a str> {
    tools.iter().copied().filter(|t| !exists(t)).collect()
}

/// Runs `cmd` with output captured; a non-zero exit becomes a setup error with the output.
fn run_captured(mut cmd: Command, what: &str) -> Result<()> {
    debug!(command = ?cmd, "running {}", what);
    let out = cmd.output()?;
    if !out.status.success() {
        let mut log = String::from_utf8_lossy(&out.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&out.stderr));
        error!(status = %out.status, out = %log, "{} failed", what);
        return Err(AppError::Setup(format!("{} failed ({})", what, out.status)));
    }
    Ok(())
}

/// Runs `cmd` attached to the terminal.
fn run_streamed(mut cmd: Command, what: &str) -> Result<()> {
    debug!(command = ?cmd, "running {}", what);
    let status = cmd
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if !status.success() {
        return Err(AppError::Setup(format!("{} failed ({})", what, status)));
    }
    Ok(())
}

fn download(dir: &Path) -> Result<PathBuf> {
    let tarball = dir.join(OPENVPN_TAR_NAME);
    let mut cmd = Command::new("wget");
    cmd.arg("-O").arg(&tarball).arg(OPENVPN_SOURCE_URL);
    run_captured(cmd, "downloading OpenVPN")?;
    Ok(tarball)
}

fn extract(tarball: &Path, dir: &Path) -> Result<PathBuf> {
    let mut cmd = Command::new("tar");
    cmd.arg("-xf").arg(tarball).arg("-C").arg(dir);
    run_captured(cmd, "extracting OpenVPN")?;
    Ok(dir.join(OPENVPN_SOURCE_FOLDER))
}

fn apply_patch(source: &Path, patch: &Path) -> Result<()> {
    let patch_file = std::fs::File::open(patch)?;
    let mut cmd = Command::new("patch");
    cmd.arg("-p1").arg("-d").arg(source).stdin(patch_file);
    run_captured(cmd, "patching OpenVPN source code")
}

fn compile(source: &Path) -> Result<PathBuf> {
    let mut configure = Command::new("./configure");
    configure.args(CONFIGURE_OPTIONS).current_dir(source);
    run_streamed(configure, "configure")?;

    let mut make = Command::new("make");
    make.current_dir(source.join("src"));
    run_streamed(make, "make")?;

    let binary = source.join("src").join("openvpn").join("openvpn");
    if !binary.is_file() {
        return Err(AppError::Setup(format!("binary '{}' failed to compile", binary.display())));
    }
    Ok(binary)
}

pub fn run(opts: &SetupOptions) -> Result<PathBuf> {
    if cfg!(windows) {
        return Err(AppError::UnsupportedPlatform(
            "windows; build openvpn manually with the provided patch".into(),
        ));
    }

    let missing = missing_tools(REQUIRED_TOOLS, command_exists);
    for tool in &missing {
        error!(tool, "not found; install build-essentials or development tools to continue");
    }
    if !missing.is_empty() {
        return Err(AppError::Setup(format!("missing commands: {}", missing.join(", "))));
    }

    if !opts.patch.is_file() {
        return Err(AppError::Setup(format!(
            "patch file '{}' not found, use --patch to point at one",
            opts.patch.display()
        )));
    }

    let source = match &opts.source {
        Some(dir) => dir.clone(),
        None => {
            let tmp = std::env::temp_dir();
            info!("Downloading and extracting {}...", OPENVPN_SOURCE_FOLDER);
            let tarball = download(&tmp)?;
            extract(&tarball, &tmp)?
        }
    };

    info!(source = %source.display(), "Applying patch...");
    apply_patch(&source, &opts.patch)?;

    info!("Compiling OpenVPN...");
    let binary = compile(&source)?;

    std::fs::create_dir_all(&opts.out)?;
    let dist = opts.out.join(DIST_BINARY);
    std::fs::copy(&binary, &dist)?;

    info!(binary = %dist.display(), "Finished compiling binary");
    info!("Move this binary somewhere safe and point vpn.openvpn in awsvpnclient.yml at it");
    Ok(dist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tools() {
        let installed = ["make", "tar"];
        let missing = missing_tools(REQUIRED_TOOLS, |t| installed.contains(&t));
        assert_eq!(missing, vec!["patch", "wget"]);
        assert!(missing_tools(REQUIRED_TOOLS, |_| true).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely-not-a-real-command-awsvpnclient"));
    }

    #[test]
    fn test_missing_patch_file() {
        if !REQUIRED_TOOLS.iter().all(|t| command_exists(t)) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let opts = SetupOptions {
            source: Some(dir.path().to_path_buf()),
            out: dir.path().to_path_buf(),
            patch: dir.path().join("missing.patch"),
        };
        assert!(matches!(run(&opts), Err(AppError::Setup(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captured_reports_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        match run_captured(cmd, "failing step") {
            Err(AppError::Setup(msg)) => assert!(msg.contains("failing step")),
            other => panic!("expected setup error, got {:?}", other),
        }

        let mut ok = Command::new("sh");
        ok.args(["-c", "exit 0"]);
        assert!(run_captured(ok, "ok step").is_ok());
    }
}
