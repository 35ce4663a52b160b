//! Configuration loading, env substitution and environment overrides.
//!
//! Config files: `stickerbot.toml`, `stickerbot.yaml` or `stickerbot.json`,
//! searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw
//! file, and the deployment variables `PORT` and `AUTH_STATE_PATH`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, load_config,
        resolve_auth_dir, to_toml_string,
    },
    schema::{
        AuthConfig, MediaConfig, QrConfig, ReconnectConfig, RouterConfig, ServerConfig,
        StickerbotConfig, WhatsAppConfig,
    },
};
