//! Media pipeline: external process runner, scratch-file lifecycle and
//! image/video to WebP sticker conversion through `ffmpeg`.

pub mod error;
pub mod runner;
pub mod scratch;
pub mod sticker;

pub use {
    error::{Error, Result},
    runner::{CommandRunner, ProcessOutput, ProcessRunner, find_binary},
    sticker::{
        MAX_STICKER_DURATION_SECS, MediaConverter, STICKER_CANVAS_PX, STICKER_MAX_FPS,
        SourceFormat, StickerConverter,
    },
};
