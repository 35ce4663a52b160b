//! `stickerbot serve`: wire the bot together and run until a shutdown signal.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::{Context, Result},
    stickerbot_config::{MediaConfig, StickerbotConfig, resolve_auth_dir},
    stickerbot_gateway::{AppState, SessionControl, build_app},
    stickerbot_media::{CommandRunner, MediaConverter, StickerConverter, find_binary},
    stickerbot_supervisor::{
        ConnectionSupervisor, FileAuthStore, MessageRouter, QrPresenter, ReconnectPolicy,
    },
    stickerbot_transport::Transport,
    stickerbot_whatsapp::WhatsAppTransport,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

pub async fn run(config: StickerbotConfig) -> Result<()> {
    let ip: IpAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);

    let auth_dir = resolve_auth_dir(&config);
    info!(auth_dir = %auth_dir.display(), "using credential directory");

    let qr = Arc::new(QrPresenter::new(config.qr.print_in_terminal));
    let transport = Arc::new(WhatsAppTransport::from_config(&config.whatsapp));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(FileAuthStore::new(auth_dir)),
        Arc::clone(&qr),
        ReconnectPolicy::from_config(&config.reconnect),
    ));

    let router = MessageRouter::new(supervisor.outbound(), build_converter(&config.media)?)
        .with_config(&config.router);
    tokio::spawn(Arc::clone(&supervisor).run(Arc::new(router)));
    {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor.start().await;
        });
    }

    let shutdown = CancellationToken::new();
    let app = build_app(AppState::new(
        Arc::clone(&supervisor) as Arc<dyn SessionControl>,
        qr,
    ));
    let mut server = tokio::spawn(stickerbot_gateway::serve(app, addr, shutdown.clone()));

    let server_result = tokio::select! {
        result = &mut server => Some(result),
        () = shutdown_signal() => None,
    };

    info!("shutting down");
    shutdown.cancel();
    supervisor.shutdown().await;
    transport.stop_sidecar().await;

    let result = match server_result {
        Some(result) => result,
        None => server.await,
    };
    result.context("HTTP server task panicked")?
}

fn build_converter(config: &MediaConfig) -> Result<Arc<dyn MediaConverter>> {
    let ffmpeg = find_binary("ffmpeg", config.ffmpeg_path.as_deref()).unwrap_or_else(|| {
        warn!("ffmpeg not found, set FFMPEG_PATH or media.ffmpeg_path; conversions will fail");
        PathBuf::from("ffmpeg")
    });
    info!(ffmpeg = %ffmpeg.display(), "using ffmpeg");

    let runner = CommandRunner::new().with_timeout(Duration::from_secs(config.job_timeout_secs));
    let mut converter = StickerConverter::new(Arc::new(runner), ffmpeg)
        .with_max_concurrent_jobs(config.max_concurrent_jobs);

    match find_binary("ffprobe", config.ffprobe_path.as_deref()) {
        Some(ffprobe) => converter = converter.with_ffprobe(ffprobe),
        None => info!("ffprobe not found, animated stickers use the full duration ceiling"),
    }
    if let Some(dir) = &config.scratch_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create scratch directory {}", dir.display()))?;
        converter = converter.with_scratch_dir(dir.clone());
    }
    Ok(Arc::new(converter))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
