//! Clip loaders
//!
//! The pool delegates the actual fetch/decode of a clip to a `VideoLoader`.
//! Loaders report failures as errors; the pool turns them into data.

use super::element::VideoMetadata;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Loader trait - fetches one clip and reports its metadata
#[async_trait]
pub trait VideoLoader: Send + Sync {
    /// Load the clip at `source_uri`
    ///
    /// # Returns
    /// * `Ok(VideoMetadata)` - Clip is playable
    /// * `Err(_)` - Clip missing or broken (reported upstream as `loaded: false`)
    async fn load(&self, source_uri: &str) -> Result<VideoMetadata>;
}

/// Loader for clips stored on the local filesystem
///
/// Parses the container (MP4/MOV via `mp4parse`, Matroska/WebM via
/// `matroska`) and reports duration and frame size of the first video track.
/// Files that do not parse, or carry no video track, fail to load.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsVideoLoader;

impl FsVideoLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoLoader for FsVideoLoader {
    async fn load(&self, source_uri: &str) -> Result<VideoMetadata> {
        let path = PathBuf::from(source_uri);
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("clip not found: {}", path.display()))?;

        if !meta.is_file() {
            bail!("not a file: {}", path.display());
        }
        if meta.len() == 0 {
            bail!("empty clip: {}", path.display());
        }

        let probe_path = path.clone();
        let metadata = tokio::task::spawn_blocking(move || probe_clip(&probe_path))
            .await
            .context("clip probe task failed")??;

        debug!(
            "Loaded clip {} ({} bytes, {:.2}s, {}x{})",
            path.display(),
            meta.len(),
            metadata.duration_seconds,
            metadata.width,
            metadata.height
        );
        Ok(metadata)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Mp4,
    Matroska,
}

fn probe_clip(path: &Path) -> Result<VideoMetadata> {
    match detect_container(path)? {
        Container::Mp4 => probe_mp4(path),
        Container::Matroska => probe_matroska(path),
    }
}

/// Container from magic bytes, falling back to the file extension
fn detect_container(path: &Path) -> Result<Container> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;

    let mut magic = [0u8; 12];
    if file.read(&mut magic).unwrap_or(0) >= 8 {
        // EBML header
        if magic[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            return Ok(Container::Matroska);
        }
        if matches!(&magic[4..8], b"ftyp" | b"moov" | b"mdat" | b"free") {
            return Ok(Container::Mp4);
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("mp4" | "m4v" | "mov") => Ok(Container::Mp4),
        Some("webm" | "mkv") => Ok(Container::Matroska),
        Some(other) => bail!("unsupported clip container: {other}"),
        None => bail!("unable to detect clip container: {}", path.display()),
    }
}

fn probe_mp4(path: &Path) -> Result<VideoMetadata> {
    let buffer = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let context = mp4parse::read_mp4(&mut Cursor::new(&buffer))
        .map_err(|e| anyhow!("MP4 parse error in {}: {e:?}", path.display()))?;

    let track = context
        .tracks
        .iter()
        .find(|t| matches!(t.track_type, mp4parse::TrackType::Video))
        .ok_or_else(|| anyhow!("no video track in {}", path.display()))?;

    let (width, height) = track
        .stsd
        .as_ref()
        .and_then(|stsd| stsd.descriptions.first())
        .and_then(|entry| match entry {
            mp4parse::SampleEntry::Video(ve) => Some((ve.width as u32, ve.height as u32)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("unsupported video sample entry in {}", path.display()))?;

    let duration = mp4_duration(&context, track);
    Ok(VideoMetadata::new(seconds(duration), width, height))
}

fn mp4_duration(context: &mp4parse::MediaContext, track: &mp4parse::Track) -> Option<Duration> {
    let scale = track
        .timescale
        .map(|s| s.0)
        .or_else(|| context.timescale.map(|s| s.0))?;
    if scale == 0 {
        return None;
    }
    let ms = track.duration?.0.checked_mul(1000)? / scale;
    Some(Duration::from_millis(ms))
}

fn probe_matroska(path: &Path) -> Result<VideoMetadata> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mkv = matroska::Matroska::open(BufReader::new(file))
        .map_err(|e| anyhow!("Matroska parse error in {}: {e}", path.display()))?;

    let (width, height) = mkv
        .tracks
        .iter()
        .find_map(|track| match &track.settings {
            matroska::Settings::Video(video) => {
                Some((video.pixel_width as u32, video.pixel_height as u32))
            }
            _ => None,
        })
        .ok_or_else(|| anyhow!("no video track in {}", path.display()))?;

    Ok(VideoMetadata::new(seconds(mkv.info.duration), width, height))
}

/// Unknown durations report as 0.0 (`VideoMetadata::duration` yields `None`)
fn seconds(duration: Option<Duration>) -> f64 {
    duration.map(|d| d.as_secs_f64()).unwrap_or(0.0)
}
