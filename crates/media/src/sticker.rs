//! Image/video to WebP sticker conversion.
//!
//! Every job writes its source to a private scratch file, runs `ffmpeg` with
//! one of two fixed argument templates and reads the encoded sticker back.
//! Scratch files are removed on every exit path.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    tokio::sync::Semaphore,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, runner::ProcessRunner, scratch::ScratchFiles};

/// Side of the square sticker canvas, in pixels.
pub const STICKER_CANVAS_PX: u32 = 512;

/// Animated stickers are cut at this duration.
pub const MAX_STICKER_DURATION_SECS: f64 = 6.0;

/// Frame-rate cap for animated stickers.
pub const STICKER_MAX_FPS: u32 = 15;

/// Default number of conversions allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

const VIDEO_QUALITY: &str = "50";
const IMAGE_QUALITY: &str = "75";

/// Kind of media a job starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Image,
    Video,
}

impl SourceFormat {
    /// Extension given to the scratch input file.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Converts raw media into sticker bytes.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    async fn convert(&self, bytes: &[u8], format: SourceFormat) -> Result<Bytes>;
}

/// `ffmpeg`-backed [`MediaConverter`].
pub struct StickerConverter {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
    scratch_dir: PathBuf,
    permits: Semaphore,
}

impl StickerConverter {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg: PathBuf) -> Self {
        Self {
            runner,
            ffmpeg,
            ffprobe: None,
            scratch_dir: std::env::temp_dir(),
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT_JOBS),
        }
    }

    /// Enable duration probing for video sources.
    pub fn with_ffprobe(mut self, ffprobe: PathBuf) -> Self {
        self.ffprobe = Some(ffprobe);
        self
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Bound the number of `ffmpeg` processes running at once.
    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.permits = Semaphore::new(jobs.max(1));
        self
    }

    /// Probe the source duration in seconds. Any failure yields `None`.
    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let ffprobe = self.ffprobe.as_deref()?;
        let output = match self.runner.run(ffprobe, &probe_args(input)).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!(code = ?output.code, "ffprobe failed, using duration ceiling");
                return None;
            },
            Err(e) => {
                debug!(error = %e, "ffprobe unavailable, using duration ceiling");
                return None;
            },
        };
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
    }
}

#[async_trait]
impl MediaConverter for StickerConverter {
    async fn convert(&self, bytes: &[u8], format: SourceFormat) -> Result<Bytes> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::external("conversion queue closed", e))?;

        let scratch = ScratchFiles::allocate(&self.scratch_dir, format.extension(), "webp");
        tokio::fs::write(scratch.input(), bytes)
            .await
            .map_err(|e| Error::io("failed to write scratch input", e))?;

        let args = match format {
            SourceFormat::Image => image_args(scratch.input(), scratch.output()),
            SourceFormat::Video => {
                let probed = self.probe_duration(scratch.input()).await;
                let duration = encode_duration(probed);
                debug!(?probed, duration, "video encode duration");
                video_args(scratch.input(), scratch.output(), duration)
            },
        };

        let result = self.runner.run(&self.ffmpeg, &args).await;
        if let Err(e) = result.and_then(|out| out.check(&self.ffmpeg)) {
            warn!(%format, input_bytes = bytes.len(), error = %e, "sticker conversion failed");
            return Err(e);
        }

        let sticker = tokio::fs::read(scratch.output())
            .await
            .map_err(|e| Error::io("failed to read sticker output", e))?;

        info!(
            %format,
            input_bytes = bytes.len(),
            output_bytes = sticker.len(),
            "sticker converted"
        );
        Ok(Bytes::from(sticker))
    }
}

/// Encode duration for a video job: the probed duration, capped at
/// [`MAX_STICKER_DURATION_SECS`]. Missing or nonsensical probes fall back to
/// the ceiling.
pub fn encode_duration(probed: Option<f64>) -> f64 {
    match probed {
        Some(secs) if secs.is_finite() && secs > 0.0 => secs.min(MAX_STICKER_DURATION_SECS),
        _ => MAX_STICKER_DURATION_SECS,
    }
}

/// Scale into the square canvas keeping aspect ratio, then pad with
/// transparent pixels.
fn canvas_filter() -> String {
    let px = STICKER_CANVAS_PX;
    format!(
        "scale={px}:{px}:force_original_aspect_ratio=decrease,format=rgba,\
         pad={px}:{px}:(ow-iw)/2:(oh-ih)/2:color=0x00000000"
    )
}

/// Argument template for still images.
pub fn image_args(input: &Path, output: &Path) -> Vec<OsString> {
    let filter = canvas_filter();
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
    args.extend(
        [
            "-vf",
            filter.as_str(),
            "-frames:v",
            "1",
            "-c:v",
            "libwebp",
            "-lossless",
            "0",
            "-q:v",
            IMAGE_QUALITY,
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

/// Argument template for animated stickers.
pub fn video_args(input: &Path, output: &Path, duration_secs: f64) -> Vec<OsString> {
    let duration = format!("{:.3}", encode_duration(Some(duration_secs)));
    let filter = format!("fps={STICKER_MAX_FPS},{}", canvas_filter());
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
    args.extend(
        [
            "-t",
            duration.as_str(),
            "-vf",
            filter.as_str(),
            "-c:v",
            "libwebp",
            "-q:v",
            VIDEO_QUALITY,
            "-loop",
            "0",
            "-an",
            "-vsync",
            "0",
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

fn probe_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]
    .map(OsString::from)
    .to_vec();
    args.push(input.into());
    args
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::runner::ProcessOutput,
        rstest::rstest,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    const FAKE_WEBP: &[u8] = b"RIFF\x00\x00\x00\x00WEBPVP8 ";

    #[derive(Debug, Clone)]
    struct Call {
        program: PathBuf,
        args: Vec<OsString>,
        input_contents: Option<Vec<u8>>,
    }

    /// Fake `ffmpeg`/`ffprobe`: writes a WebP stub to the last argument on
    /// success, reports a probe duration, or fails with exit code 1.
    struct FakeRunner {
        encode_ok: bool,
        probe_stdout: Option<&'static str>,
        calls: Mutex<Vec<Call>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeRunner {
        fn new(encode_ok: bool, probe_stdout: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                encode_ok,
                probe_stdout,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn encode_calls(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| c.program.ends_with("ffmpeg"))
                .collect()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, program: &Path, args: &[OsString]) -> Result<ProcessOutput> {
            let input = args
                .iter()
                .position(|a| a == "-i")
                .and_then(|i| args.get(i + 1))
                .or_else(|| args.last())
                .map(PathBuf::from)
                .unwrap();
            self.calls.lock().unwrap().push(Call {
                program: program.to_path_buf(),
                args: args.to_vec(),
                input_contents: std::fs::read(&input).ok(),
            });

            if program.ends_with("ffprobe") {
                return Ok(match self.probe_stdout {
                    Some(stdout) => ProcessOutput {
                        code: Some(0),
                        stdout: stdout.as_bytes().to_vec(),
                        stderr: Vec::new(),
                    },
                    None => ProcessOutput {
                        code: Some(1),
                        stdout: Vec::new(),
                        stderr: b"moov atom not found".to_vec(),
                    },
                });
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if !self.encode_ok {
                return Ok(ProcessOutput {
                    code: Some(1),
                    stdout: Vec::new(),
                    stderr: b"Invalid data found when processing input".to_vec(),
                });
            }
            let output = PathBuf::from(args.last().unwrap());
            std::fs::write(output, FAKE_WEBP).unwrap();
            Ok(ProcessOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    fn converter(runner: Arc<FakeRunner>, dir: &Path) -> StickerConverter {
        StickerConverter::new(runner, PathBuf::from("/usr/bin/ffmpeg"))
            .with_ffprobe(PathBuf::from("/usr/bin/ffprobe"))
            .with_scratch_dir(dir.to_path_buf())
    }

    fn arg_after(args: &[OsString], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|a| a.to_string_lossy().into_owned())
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[rstest]
    #[case(None, 6.0)]
    #[case(Some(2.5), 2.5)]
    #[case(Some(6.0), 6.0)]
    #[case(Some(42.0), 6.0)]
    #[case(Some(0.0), 6.0)]
    #[case(Some(-1.0), 6.0)]
    #[case(Some(f64::NAN), 6.0)]
    #[case(Some(f64::INFINITY), 6.0)]
    fn encode_duration_is_clamped(#[case] probed: Option<f64>, #[case] expected: f64) {
        assert_eq!(encode_duration(probed), expected);
    }

    #[test]
    fn image_template_pads_to_transparent_square() {
        let args = image_args(Path::new("/tmp/in.jpg"), Path::new("/tmp/st.webp"));
        let filter = arg_after(&args, "-vf").unwrap();
        assert!(filter.starts_with("scale=512:512:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=512:512"));
        assert!(filter.contains("color=0x00000000"));
        assert_eq!(arg_after(&args, "-c:v").as_deref(), Some("libwebp"));
        assert_eq!(args.last().unwrap(), "/tmp/st.webp");
        assert!(arg_after(&args, "-t").is_none());
    }

    #[test]
    fn video_template_caps_fps_and_strips_audio() {
        let args = video_args(Path::new("/tmp/in.mp4"), Path::new("/tmp/st.webp"), 3.0);
        let filter = arg_after(&args, "-vf").unwrap();
        assert!(filter.starts_with("fps=15,"));
        assert!(filter.contains("pad=512:512"));
        assert!(args.iter().any(|a| a == "-an"));
        assert_eq!(arg_after(&args, "-loop").as_deref(), Some("0"));
        assert_eq!(arg_after(&args, "-c:v").as_deref(), Some("libwebp"));
        assert_eq!(arg_after(&args, "-t").as_deref(), Some("3.000"));
    }

    #[test]
    fn video_template_never_exceeds_ceiling() {
        let args = video_args(Path::new("/tmp/in.mp4"), Path::new("/tmp/st.webp"), 120.0);
        assert_eq!(arg_after(&args, "-t").as_deref(), Some("6.000"));
    }

    #[tokio::test]
    async fn image_conversion_returns_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, None);
        let conv = converter(Arc::clone(&runner), dir.path());

        let sticker = conv.convert(b"jpeg bytes", SourceFormat::Image).await.unwrap();
        assert_eq!(&sticker[..], FAKE_WEBP);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1, "images are never probed");
        assert_eq!(calls[0].input_contents.as_deref(), Some(&b"jpeg bytes"[..]));
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failed_encode_propagates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(false, None);
        let conv = converter(Arc::clone(&runner), dir.path());

        let err = conv.convert(b"", SourceFormat::Image).await.unwrap_err();
        assert!(matches!(err, Error::ProcessFailed { code: Some(1), .. }));
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn video_uses_probed_duration_when_short() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, Some("2.480000\n"));
        let conv = converter(Arc::clone(&runner), dir.path());

        conv.convert(b"mp4 bytes", SourceFormat::Video).await.unwrap();
        let encode = runner.encode_calls();
        assert_eq!(arg_after(&encode[0].args, "-t").as_deref(), Some("2.480"));
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn video_clamps_long_sources() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, Some("31.2"));
        let conv = converter(Arc::clone(&runner), dir.path());

        conv.convert(b"mp4 bytes", SourceFormat::Video).await.unwrap();
        let encode = runner.encode_calls();
        assert_eq!(arg_after(&encode[0].args, "-t").as_deref(), Some("6.000"));
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, None);
        let conv = converter(Arc::clone(&runner), dir.path());

        let sticker = conv.convert(b"mp4 bytes", SourceFormat::Video).await;
        assert!(sticker.is_ok());
        let encode = runner.encode_calls();
        assert_eq!(arg_after(&encode[0].args, "-t").as_deref(), Some("6.000"));
    }

    #[tokio::test]
    async fn video_without_ffprobe_uses_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, Some("1.0"));
        let conv = StickerConverter::new(runner.clone(), PathBuf::from("/usr/bin/ffmpeg"))
            .with_scratch_dir(dir.path().to_path_buf());

        conv.convert(b"mp4 bytes", SourceFormat::Video).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(arg_after(&calls[0].args, "-t").as_deref(), Some("6.000"));
    }

    #[tokio::test]
    async fn concurrent_jobs_use_distinct_files_and_respect_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(true, None);
        let conv = Arc::new(
            StickerConverter::new(runner.clone(), PathBuf::from("/usr/bin/ffmpeg"))
                .with_scratch_dir(dir.path().to_path_buf())
                .with_max_concurrent_jobs(2),
        );

        let jobs: Vec<_> = (0..6u8)
            .map(|i| {
                let conv = Arc::clone(&conv);
                tokio::spawn(async move { conv.convert(&[i; 4], SourceFormat::Image).await })
            })
            .collect();
        for job in jobs {
            job.await.unwrap().unwrap();
        }

        let calls = runner.calls();
        let mut inputs: Vec<_> = calls
            .iter()
            .map(|c| arg_after(&c.args, "-i").unwrap())
            .collect();
        inputs.sort();
        inputs.dedup();
        assert_eq!(inputs.len(), 6);
        for call in &calls {
            let contents = call.input_contents.as_ref().unwrap();
            assert!(contents.iter().all(|b| *b == contents[0]));
        }
        assert!(runner.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(scratch_is_empty(dir.path()));
    }
}
