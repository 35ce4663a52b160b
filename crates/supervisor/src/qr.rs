//! Pairing code presentation.
//!
//! The latest pairing code is kept as a ready-to-serve PNG for the HTTP
//! surface and, optionally, logged as a text QR for headless deployments.

use std::{
    io::Cursor,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    bytes::Bytes,
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{QrCode, render::unicode},
    tracing::{debug, info},
};

use crate::{Error, Result};

const PNG_MIN_PX: u32 = 320;

/// The current pairing code, rendered.
#[derive(Debug, Clone)]
pub struct PairingImage {
    pub code: String,
    pub png: Bytes,
    /// Increments with every published code.
    pub sequence: u64,
}

/// Holds at most one pairing code: the latest one published.
pub struct QrPresenter {
    current: RwLock<Option<PairingImage>>,
    issued: AtomicU64,
    print_in_terminal: bool,
}

impl Default for QrPresenter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl QrPresenter {
    pub fn new(print_in_terminal: bool) -> Self {
        Self {
            current: RwLock::new(None),
            issued: AtomicU64::new(0),
            print_in_terminal,
        }
    }

    /// Replace the current pairing code.
    pub fn publish(&self, code: &str) -> Result<()> {
        let qr = QrCode::new(code.as_bytes()).map_err(Error::qr)?;
        let png = render_png(&qr)?;
        if self.print_in_terminal {
            info!("scan this code with WhatsApp > Linked devices:\n{}", render_text(&qr));
        }

        let sequence = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let image = PairingImage {
            code: code.to_string(),
            png,
            sequence,
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(image);
        info!(sequence, "new pairing code available");
        Ok(())
    }

    /// Drop the current code. Returns whether one was present.
    pub fn clear(&self) -> bool {
        let had = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had {
            debug!("pairing code cleared");
        }
        had
    }

    pub fn current(&self) -> Option<PairingImage> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_pending(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of codes published since start.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

fn render_png(qr: &QrCode) -> Result<Bytes> {
    let img = qr
        .render::<Luma<u8>>()
        .min_dimensions(PNG_MIN_PX, PNG_MIN_PX)
        .build();
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(Error::qr)?;
    Ok(Bytes::from(buf))
}

fn render_text(qr: &QrCode) -> String {
    qr.render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build()
}
