//! Inbound message dispatch.

use std::sync::Arc;

use {
    async_trait::async_trait,
    stickerbot_config::RouterConfig,
    stickerbot_media::{MediaConverter, SourceFormat},
    stickerbot_transport::{InboundMessage, Outbound, Payload},
    tracing::{debug, info, warn},
};

use crate::{Result, supervisor::InboundHandler};

/// Fixed text commands, matched trimmed and case-insensitively.
const COMMANDS: &[(&str, &str)] = &[
    ("oi", "Oi 👋 tudo bem?"),
    ("reset", "Bot resetado com sucesso ✅"),
];

/// What the router did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Ignored,
    Replied,
    StickerSent,
}

pub struct MessageRouter {
    outbound: Arc<dyn Outbound>,
    converter: Arc<dyn MediaConverter>,
    echo_unmatched: bool,
}

impl MessageRouter {
    pub fn new(outbound: Arc<dyn Outbound>, converter: Arc<dyn MediaConverter>) -> Self {
        Self {
            outbound,
            converter,
            echo_unmatched: true,
        }
    }

    pub fn with_config(mut self, config: &RouterConfig) -> Self {
        self.echo_unmatched = config.echo_unmatched;
        self
    }

    /// Handle one message. At most one reply is sent.
    pub async fn route(&self, message: &InboundMessage) -> Result<RouteOutcome> {
        if message.from_me {
            return Ok(RouteOutcome::Ignored);
        }

        match &message.payload {
            Payload::Text(text) => self.route_text(message, text).await,
            Payload::Image(bytes) => self.reply_sticker(message, bytes, SourceFormat::Image).await,
            Payload::Video(bytes) => self.reply_sticker(message, bytes, SourceFormat::Video).await,
            Payload::Unsupported { kind } => {
                debug!(id = %message.id, kind, "ignoring unsupported message");
                Ok(RouteOutcome::Ignored)
            },
        }
    }

    async fn route_text(&self, message: &InboundMessage, text: &str) -> Result<RouteOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(RouteOutcome::Ignored);
        }

        let reply = match command_reply(text) {
            Some(reply) => {
                info!(chat = %message.chat, command = %text.to_lowercase(), "command received");
                reply.to_string()
            },
            None if self.echo_unmatched => format!("Você disse: \"{text}\""),
            None => return Ok(RouteOutcome::Ignored),
        };
        self.outbound.send_text(&message.chat, &reply).await?;
        Ok(RouteOutcome::Replied)
    }

    async fn reply_sticker(
        &self,
        message: &InboundMessage,
        bytes: &[u8],
        format: SourceFormat,
    ) -> Result<RouteOutcome> {
        info!(chat = %message.chat, %format, size = bytes.len(), "converting media to sticker");
        let sticker = self.converter.convert(bytes, format).await?;
        self.outbound.send_sticker(&message.chat, sticker).await?;
        Ok(RouteOutcome::StickerSent)
    }
}

#[async_trait]
impl InboundHandler for MessageRouter {
    async fn handle(&self, message: InboundMessage) {
        match self.route(&message).await {
            Ok(outcome) => debug!(id = %message.id, ?outcome, "message routed"),
            Err(e) => warn!(
                id = %message.id,
                chat = %message.chat,
                error = %e,
                "failed to handle message"
            ),
        }
    }
}

fn command_reply(text: &str) -> Option<&'static str> {
    COMMANDS
        .iter()
        .find(|(command, _)| text.eq_ignore_ascii_case(command))
        .map(|(_, reply)| *reply)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        ffi::OsString,
        path::Path,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use {
        super::*,
        bytes::Bytes,
        rstest::rstest,
        stickerbot_media::{ProcessOutput, ProcessRunner, StickerConverter},
        stickerbot_transport::OutboundPayload,
    };

    const WEBP: &[u8] = b"RIFF\0\0\0\0WEBP";

    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<(String, OutboundPayload)>>,
    }

    impl RecordingOutbound {
        fn sent(&self) -> Vec<(String, OutboundPayload)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send(
            &self,
            to: &str,
            payload: OutboundPayload,
        ) -> stickerbot_transport::Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), payload));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConverter {
        calls: Mutex<Vec<(usize, SourceFormat)>>,
    }

    #[async_trait]
    impl MediaConverter for FakeConverter {
        async fn convert(
            &self,
            bytes: &[u8],
            format: SourceFormat,
        ) -> stickerbot_media::Result<Bytes> {
            self.calls.lock().unwrap().push((bytes.len(), format));
            Ok(Bytes::from_static(WEBP))
        }
    }

    /// Runs nothing; every invocation exits with the configured code.
    struct ExitRunner {
        code: i32,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProcessRunner for ExitRunner {
        async fn run(
            &self,
            _program: &Path,
            args: &[OsString],
        ) -> stickerbot_media::Result<ProcessOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.code == 0
                && let Some(out) = args.last()
            {
                std::fs::write(out, WEBP).unwrap();
            }
            Ok(ProcessOutput {
                code: Some(self.code),
                stdout: Vec::new(),
                stderr: b"Invalid data found when processing input".to_vec(),
            })
        }
    }

    const CHAT: &str = "5511988887777@s.whatsapp.net";

    fn message(payload: Payload) -> InboundMessage {
        InboundMessage {
            id: "3EB0C0FFEE".into(),
            chat: CHAT.into(),
            sender: None,
            from_me: false,
            payload,
        }
    }

    fn router(echo: bool) -> (MessageRouter, Arc<RecordingOutbound>, Arc<FakeConverter>) {
        let outbound = Arc::new(RecordingOutbound::default());
        let converter = Arc::new(FakeConverter::default());
        let router = MessageRouter::new(
            Arc::clone(&outbound) as Arc<dyn Outbound>,
            Arc::clone(&converter) as Arc<dyn MediaConverter>,
        )
        .with_config(&RouterConfig {
            echo_unmatched: echo,
        });
        (router, outbound, converter)
    }

    #[rstest]
    #[case("oi", "Oi 👋 tudo bem?")]
    #[case("OI", "Oi 👋 tudo bem?")]
    #[case("  Oi \n", "Oi 👋 tudo bem?")]
    #[case("reset", "Bot resetado com sucesso ✅")]
    #[case("RESET", "Bot resetado com sucesso ✅")]
    #[tokio::test]
    async fn commands_reply_once(#[case] text: &str, #[case] expected: &str) {
        let (router, outbound, _) = router(true);

        let outcome = router.route(&message(Payload::Text(text.into()))).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Replied);
        assert_eq!(outbound.sent(), vec![(
            CHAT.to_string(),
            OutboundPayload::Text(expected.into())
        )]);
    }

    #[tokio::test]
    async fn unmatched_text_is_echoed() {
        let (router, outbound, _) = router(true);

        router
            .route(&message(Payload::Text("oi tudo bem".into())))
            .await
            .unwrap();
        assert_eq!(outbound.sent(), vec![(
            CHAT.to_string(),
            OutboundPayload::Text("Você disse: \"oi tudo bem\"".into())
        )]);
    }

    #[tokio::test]
    async fn unmatched_text_without_echo_is_ignored() {
        let (router, outbound, _) = router(false);

        let outcome = router
            .route(&message(Payload::Text("hello".into())))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn own_and_empty_messages_are_ignored() {
        let (router, outbound, _) = router(true);

        let mut own = message(Payload::Text("oi".into()));
        own.from_me = true;
        assert_eq!(router.route(&own).await.unwrap(), RouteOutcome::Ignored);
        assert_eq!(
            router.route(&message(Payload::Text("   ".into()))).await.unwrap(),
            RouteOutcome::Ignored
        );
        assert_eq!(
            router
                .route(&message(Payload::Unsupported { kind: "audio".into() }))
                .await
                .unwrap(),
            RouteOutcome::Ignored
        );
        assert!(outbound.sent().is_empty());
    }

    #[rstest]
    #[case(Payload::Image(Bytes::from(vec![0xFF; 1024])), SourceFormat::Image)]
    #[case(Payload::Video(Bytes::from(vec![0x00; 2048])), SourceFormat::Video)]
    #[tokio::test]
    async fn media_becomes_sticker(#[case] payload: Payload, #[case] format: SourceFormat) {
        let (router, outbound, converter) = router(true);
        let size = match &payload {
            Payload::Image(b) | Payload::Video(b) => b.len(),
            _ => unreachable!(),
        };

        let outcome = router.route(&message(payload)).await.unwrap();
        assert_eq!(outcome, RouteOutcome::StickerSent);
        assert_eq!(*converter.calls.lock().unwrap(), vec![(size, format)]);
        assert_eq!(outbound.sent(), vec![(
            CHAT.to_string(),
            OutboundPayload::Sticker(Bytes::from_static(WEBP))
        )]);
    }

    #[tokio::test]
    async fn failed_conversion_sends_nothing_and_leaves_no_files() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = Arc::new(ExitRunner {
            code: 1,
            calls: AtomicUsize::new(0),
        });
        let converter = StickerConverter::new(
            Arc::clone(&runner) as Arc<dyn ProcessRunner>,
            "ffmpeg".into(),
        )
        .with_scratch_dir(scratch.path().to_path_buf());
        let outbound = Arc::new(RecordingOutbound::default());
        let router = MessageRouter::new(
            Arc::clone(&outbound) as Arc<dyn Outbound>,
            Arc::new(converter),
        );

        let result = router
            .route(&message(Payload::Image(Bytes::from(vec![0xFF; 512]))))
            .await;

        assert!(matches!(result, Err(crate::Error::Media(_))));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(outbound.sent().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn successful_conversion_sends_one_sticker() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = Arc::new(ExitRunner {
            code: 0,
            calls: AtomicUsize::new(0),
        });
        let converter = StickerConverter::new(runner, "ffmpeg".into())
            .with_scratch_dir(scratch.path().to_path_buf());
        let outbound = Arc::new(RecordingOutbound::default());
        let router = MessageRouter::new(
            Arc::clone(&outbound) as Arc<dyn Outbound>,
            Arc::new(converter),
        );

        let outcome = router
            .route(&message(Payload::Image(Bytes::from(vec![0xFF; 512]))))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::StickerSent);
        assert_eq!(outbound.sent().len(), 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
