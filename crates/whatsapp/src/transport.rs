//! [`Transport`] over the Baileys sidecar.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    stickerbot_config::WhatsAppConfig,
    stickerbot_transport::{
        Credentials, Error, Outbound, OutboundPayload, Result, SessionHandle, Transport,
        TransportEventSink,
    },
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    DEFAULT_SIDECAR_PORT,
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    protocol::GatewayMessage,
    sidecar::{SendOutcome, SidecarConnection, connect_with_retry},
};

const CONNECT_ATTEMPTS: u32 = 10;
const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// WhatsApp Web through a local Baileys sidecar.
pub struct WhatsAppTransport {
    port: u16,
    sidecar_dir: Option<PathBuf>,
    auto_start: bool,
    browser: [String; 3],
    process: Mutex<Option<SidecarProcess>>,
}

impl Default for WhatsAppTransport {
    fn default() -> Self {
        Self::from_config(&WhatsAppConfig::default())
    }
}

impl WhatsAppTransport {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            port: config.sidecar_port,
            sidecar_dir: config.sidecar_dir.clone(),
            auto_start: config.auto_start_sidecar,
            browser: config.browser.clone(),
            process: Mutex::new(None),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Expect an externally managed sidecar.
    pub fn without_auto_start(mut self) -> Self {
        self.auto_start = false;
        self
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Spawn the sidecar unless it is already running.
    async fn ensure_sidecar_running(&self) -> anyhow::Result<()> {
        let mut process = self.process.lock().await;
        if let Some(running) = process.as_mut() {
            if running.is_running() {
                return Ok(());
            }
            warn!("WhatsApp sidecar died, restarting it");
        }

        let config = SidecarConfig {
            sidecar_dir: find_sidecar_dir(self.sidecar_dir.as_deref())?,
            port: self.port,
        };
        *process = Some(start_sidecar(&config).await?);
        Ok(())
    }

    /// Stop the sidecar if this transport started it.
    pub async fn stop_sidecar(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            process.stop().await;
        }
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    fn id(&self) -> &str {
        "whatsapp-web"
    }

    async fn open_session(
        &self,
        credentials: Credentials,
        sink: Arc<dyn TransportEventSink>,
    ) -> Result<Arc<dyn SessionHandle>> {
        if self.auto_start {
            self.ensure_sidecar_running()
                .await
                .map_err(|e| Error::unavailable(format!("{e:#}")))?;
        }

        let pairing = credentials.is_empty();
        let conn = connect_with_retry(&self.url(), sink, CONNECT_ATTEMPTS).await?;
        conn.send_frame(&GatewayMessage::Open {
            credentials: credentials.into_value(),
            browser: self.browser.clone(),
        })?;
        info!(port = self.port, pairing, "WhatsApp session requested");

        Ok(Arc::new(WhatsAppSession { conn }))
    }
}

/// One open sidecar session.
pub struct WhatsAppSession {
    conn: SidecarConnection,
}

#[async_trait]
impl Outbound for WhatsAppSession {
    async fn send(&self, to: &str, payload: OutboundPayload) -> Result<()> {
        if !self.conn.is_connected() {
            return Err(Error::unavailable("sidecar connection closed"));
        }
        if to.is_empty() {
            return Err(Error::invalid_input("empty recipient"));
        }

        let request_id = Uuid::new_v4().to_string();
        let result = self.conn.expect_result(&request_id);
        let frame = GatewayMessage::Send {
            request_id: request_id.clone(),
            to: to.to_string(),
            payload: payload.into(),
        };
        if let Err(e) = self.conn.send_frame(&frame) {
            self.conn.forget(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(SEND_TIMEOUT, result).await {
            Ok(Ok(SendOutcome { success: true, .. })) => {
                debug!(to, request_id, "message delivered to sidecar");
                Ok(())
            },
            Ok(Ok(SendOutcome { error, .. })) => Err(Error::rejected(
                error.unwrap_or_else(|| "sidecar reported failure".into()),
            )),
            Ok(Err(_)) => Err(Error::unavailable("sidecar connection lost during send")),
            Err(_) => {
                self.conn.forget(&request_id);
                Err(Error::unavailable("timed out waiting for sidecar send result"))
            },
        }
    }
}

#[async_trait]
impl SessionHandle for WhatsAppSession {
    async fn close(&self) -> Result<()> {
        let result = self.conn.send_frame(&GatewayMessage::Close);
        self.conn.disconnect();
        result
    }
}
