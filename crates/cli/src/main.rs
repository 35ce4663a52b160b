mod auth_commands;
mod config_commands;
mod serve;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    stickerbot_config::StickerbotConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "stickerbot", about = "stickerbot: WhatsApp image and video to sticker bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of stickerbot.{toml,yaml,yml,json}).
    #[arg(long, global = true, env = "STICKERBOT_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value and PORT).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot and its HTTP server (default when no subcommand is provided).
    Serve,
    /// Delete the stored WhatsApp credentials so the next start pairs again.
    ResetAuth,
    /// Print the effective configuration as TOML.
    Config,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

/// File config (explicit or discovered), then environment, then flags.
fn load_config(cli: &Cli) -> anyhow::Result<StickerbotConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => load_explicit(path)?,
        None => stickerbot_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

fn load_explicit(path: &Path) -> anyhow::Result<StickerbotConfig> {
    let config = stickerbot_config::load_config(path)?;
    Ok(stickerbot_config::apply_env_overrides(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "stickerbot starting");
            serve::run(config).await
        },
        Some(Commands::ResetAuth) => auth_commands::reset_auth(&config).await,
        Some(Commands::Config) => config_commands::print_config(&config),
    }
}
