use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::StickerbotConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "stickerbot.toml",
    "stickerbot.yaml",
    "stickerbot.yml",
    "stickerbot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<StickerbotConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./stickerbot.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/stickerbot/stickerbot.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `StickerbotConfig::default()` if no file is found or the
/// file fails to parse.
pub fn discover_and_load() -> StickerbotConfig {
    let config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                StickerbotConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            StickerbotConfig::default()
        },
    };
    apply_env_overrides(config)
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .chain(
            config_dir()
                .into_iter()
                .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name))),
        )
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/stickerbot/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stickerbot").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory, falling back to the working directory.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "stickerbot")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Credential directory: the configured one, or `<data dir>/auth_info`.
pub fn resolve_auth_dir(config: &StickerbotConfig) -> PathBuf {
    config
        .auth
        .state_dir
        .clone()
        .unwrap_or_else(|| data_dir().join("auth_info"))
}

/// Apply deployment environment variables on top of file values.
///
/// | Variable | Field |
/// |---|---|
/// | `PORT` | `server.port` |
/// | `AUTH_STATE_PATH` | `auth.state_dir` |
/// | `FFMPEG_PATH` | `media.ffmpeg_path` |
/// | `FFPROBE_PATH` | `media.ffprobe_path` |
/// | `STICKERBOT_SIDECAR_DIR` | `whatsapp.sidecar_dir` |
/// | `STICKERBOT_SIDECAR_PORT` | `whatsapp.sidecar_port` |
pub fn apply_env_overrides(config: StickerbotConfig) -> StickerbotConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: StickerbotConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> StickerbotConfig {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = non_empty("PORT") {
        match port.trim().parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(dir) = non_empty("AUTH_STATE_PATH") {
        config.auth.state_dir = Some(PathBuf::from(dir));
    }
    if let Some(path) = non_empty("FFMPEG_PATH") {
        config.media.ffmpeg_path = Some(PathBuf::from(path));
    }
    if let Some(path) = non_empty("FFPROBE_PATH") {
        config.media.ffprobe_path = Some(PathBuf::from(path));
    }
    if let Some(dir) = non_empty("STICKERBOT_SIDECAR_DIR") {
        config.whatsapp.sidecar_dir = Some(PathBuf::from(dir));
    }
    if let Some(port) = non_empty("STICKERBOT_SIDECAR_PORT") {
        match port.trim().parse() {
            Ok(port) => config.whatsapp.sidecar_port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid STICKERBOT_SIDECAR_PORT"),
        }
    }
    config
}

/// Serialize the effective config as TOML.
pub fn to_toml_string(config: &StickerbotConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<StickerbotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
