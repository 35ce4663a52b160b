//! Baileys sidecar process management.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

const SIDECAR_DIR_ENV: &str = "STICKERBOT_SIDECAR_DIR";
const RELATIVE_SIDECAR_DIR: &str = "sidecar/whatsapp-baileys";
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running sidecar.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if the process is still around after a few
    /// seconds.
    pub async fn stop(&mut self) {
        info!(port = self.port, "stopping WhatsApp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok())
                && let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM)
            {
                debug!(pid, error = %e, "SIGTERM to sidecar failed");
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = self.child.start_kill() {
                debug!(error = %e, "failed to kill sidecar");
            }
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "WhatsApp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar"),
            Err(_) => {
                warn!("sidecar ignored SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "failed to kill sidecar");
                }
            },
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory with the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
}

fn is_sidecar_dir(path: &Path) -> bool {
    path.join("package.json").is_file()
}

/// Locate the sidecar directory.
///
/// Checked in order: the explicit path, `STICKERBOT_SIDECAR_DIR`,
/// `sidecar/whatsapp-baileys` next to or above the executable, then the same
/// relative path from the working directory and its parents.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    find_sidecar_dir_with(explicit, std::env::var_os(SIDECAR_DIR_ENV).map(PathBuf::from))
}

fn find_sidecar_dir_with(explicit: Option<&Path>, from_env: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if is_sidecar_dir(path) {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in configured sidecar directory {}", path.display());
    }

    if let Some(path) = from_env {
        if is_sidecar_dir(&path) {
            return Ok(path);
        }
        warn!(path = %path.display(), "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let candidates = exe_dir
        .iter()
        .flat_map(|dir| {
            [
                dir.join("..").join(RELATIVE_SIDECAR_DIR),
                dir.join("../..").join(RELATIVE_SIDECAR_DIR),
            ]
        })
        .chain(
            ["", "..", "../.."]
                .into_iter()
                .map(|up| Path::new(up).join(RELATIVE_SIDECAR_DIR)),
        );

    for candidate in candidates {
        if is_sidecar_dir(&candidate) {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    bail!(
        "WhatsApp sidecar not found; set {SIDECAR_DIR_ENV} or whatsapp.sidecar_dir to the \
         directory holding its package.json"
    )
}

/// Start the sidecar, building it first when `dist/index.js` is missing.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !is_sidecar_dir(dir) {
        bail!("no package.json in {}", dir.display());
    }

    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar");
    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("STICKERBOT_SIDECAR_PORT", config.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn node for the WhatsApp sidecar")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, true));
    }

    tokio::time::sleep(STARTUP_GRACE).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to poll sidecar process")?
    {
        bail!("WhatsApp sidecar exited during startup: {status}");
    }

    info!(port = config.port, "WhatsApp sidecar running");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    let command = format!("npm {}", args.join(" "));
    info!(path = %dir.display(), %command, "preparing WhatsApp sidecar");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run {command}"))?;
    if !output.status.success() {
        bail!(
            "{command} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Sidecar log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Split a pino JSON line into level and message. Plain lines pass through.
fn parse_log_line(line: &str, stderr: bool) -> (LogLevel, String) {
    let fallback = if stderr { LogLevel::Warn } else { LogLevel::Info };
    if !line.starts_with('{') {
        return (fallback, line.to_string());
    }
    let Ok(log) = serde_json::from_str::<serde_json::Value>(line) else {
        return (fallback, line.to_string());
    };
    let level = match log.get("level").and_then(serde_json::Value::as_u64) {
        Some(0..=20) => LogLevel::Debug,
        Some(21..=30) | None => LogLevel::Info,
        Some(31..=40) => LogLevel::Warn,
        Some(_) => LogLevel::Error,
    };
    let msg = log
        .get("msg")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(line)
        .to_string();
    (level, msg)
}

async fn forward_lines(stream: impl AsyncRead + Unpin, stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_log_line(&line, stderr) {
            (LogLevel::Debug, msg) => debug!(target: "whatsapp_sidecar", "{msg}"),
            (LogLevel::Info, msg) => info!(target: "whatsapp_sidecar", "{msg}"),
            (LogLevel::Warn, msg) => warn!(target: "whatsapp_sidecar", "{msg}"),
            (LogLevel::Error, msg) => error!(target: "whatsapp_sidecar", "{msg}"),
        }
    }
}
