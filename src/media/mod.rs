// External tool orchestration
//
// This module wraps the binaries the service shells out to:
// - Commands: generic command building and execution with stderr capture
// - Toolbox: ffprobe/ffmpeg/mkvmerge operations on subtitle tracks

pub mod commands;
pub mod toolbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use commands::ToolCommand;
pub use toolbox::FfmpegToolbox;

use crate::error::Result;

/// One subtitle stream inside a media container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub index: i64,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
}

/// Main trait for media container operations.
#[async_trait]
pub trait MediaToolbox: Send + Sync {
    /// List subtitle streams in a container.
    async fn list_tracks(&self, path: &Path) -> Result<Vec<SubtitleTrack>>;

    /// Extract one subtitle stream into `scratch`, in its native text format.
    /// Returns the path of the extracted file.
    async fn extract_track(&self, path: &Path, track_index: i64, scratch: &Path)
        -> Result<PathBuf>;

    /// Produce a new MKV with `subtitle` appended as an extra track.
    async fn merge_subtitle(
        &self,
        mkv_in: &Path,
        mkv_out: &Path,
        subtitle: &Path,
        language_code: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<()>;

    /// Merge `subtitle` into `mkv` via a sibling temp file, then rename the
    /// result over the original.
    async fn replace_in_place(
        &self,
        mkv: &Path,
        subtitle: &Path,
        language_code: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<()>;
}

/// Graphical subtitle codecs cannot be extracted as text.
pub fn is_text_codec(codec: &str) -> bool {
    !matches!(codec, "hdmv_pgs_subtitle" | "dvd_subtitle")
}

/// Native on-disk format for a subtitle codec.
pub fn native_extension(codec: &str) -> &'static str {
    match codec {
        "ass" | "ssa" => "ass",
        _ => "srt",
    }
}

/// Move a file, degrading to copy-then-unlink when rename fails.
///
/// Rename cannot cross mount boundaries (EXDEV); sources on SMB/NFS shares
/// and scratch on local disk make that a routine case, not an edge case.
pub async fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "Rename failed, falling back to copy"
            );
            copy_then_remove(src, dst).await
        }
    }
}

async fn copy_then_remove(src: &Path, dst: &Path) -> Result<()> {
    tokio::fs::copy(src, dst).await?;
    tokio::fs::remove_file(src).await?;
    Ok(())
}
