//! Config schema types (server, auth, reconnect, media, whatsapp, router, qr).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerbotConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub reconnect: ReconnectConfig,
    pub media: MediaConfig,
    pub whatsapp: WhatsAppConfig,
    pub router: RouterConfig,
    pub qr: QrConfig,
}

/// HTTP surface (health checks and QR display).
///
/// The routes carry no authentication. `/qr` shows the pairing code and
/// `POST /restart` restarts a stopped session, so bind to a loopback address
/// or put the bot behind an authenticating proxy when the port is reachable
/// from untrusted networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0" so hosted health checks
    /// can reach the bot.
    pub bind: String,
    /// Port to listen on. `PORT` overrides it.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Session credential storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding the session credentials. `AUTH_STATE_PATH`
    /// overrides it; defaults to `<data dir>/auth_info`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

/// Reconnect policy after a recoverable disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retries allowed before giving up. The counter resets once the
    /// session opens.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,
    /// Add up to 25% random extra delay to each retry.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 2_000,
            jitter: false,
        }
    }
}

/// Sticker conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Explicit `ffmpeg` binary; searched in `PATH` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit `ffprobe` binary; searched in `PATH` when unset. Without
    /// it, animated stickers always use the full duration ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<PathBuf>,
    /// Scratch directory for conversion jobs. Defaults to the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Conversions allowed to run at once.
    pub max_concurrent_jobs: usize,
    /// Kill `ffmpeg` after this many seconds.
    pub job_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            scratch_dir: None,
            max_concurrent_jobs: 2,
            job_timeout_secs: 90,
        }
    }
}

/// WhatsApp Web sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Directory with the sidecar's `package.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,
    /// Local WebSocket port the sidecar listens on.
    pub sidecar_port: u16,
    /// Spawn and supervise the sidecar process. Disable to run it by hand.
    pub auto_start_sidecar: bool,
    /// Browser triple announced to WhatsApp (name, browser, version).
    pub browser: [String; 3],
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: None,
            sidecar_port: 3481,
            auto_start_sidecar: true,
            browser: ["Stickerbot".into(), "Chrome".into(), "1.0".into()],
        }
    }
}

/// Text message handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Echo text that matches no command back to the sender.
    pub echo_unmatched: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            echo_unmatched: true,
        }
    }
}

/// Pairing code display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QrConfig {
    /// Also log new pairing codes as a text QR.
    pub print_in_terminal: bool,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            print_in_terminal: true,
        }
    }
}
