use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{is_text_codec, move_file, native_extension, MediaToolbox, SubtitleTrack, ToolCommand};
use crate::error::{AppError, Result};

/// ffprobe/ffmpeg/mkvmerge-backed implementation of [`MediaToolbox`].
pub struct FfmpegToolbox {
    ffmpeg: String,
    ffprobe: String,
    mkvmerge: String,
}

impl Default for FfmpegToolbox {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            mkvmerge: "mkvmerge".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    index: i64,
    codec_name: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    language: Option<String>,
    title: Option<String>,
}

fn parse_probe_output(json: &str) -> Result<Vec<SubtitleTrack>> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    Ok(probe
        .streams
        .into_iter()
        .map(|s| SubtitleTrack {
            index: s.index,
            codec: s.codec_name.unwrap_or_else(|| "unknown".to_string()),
            language: s.tags.language,
            title: s.tags.title,
        })
        .collect())
}

impl FfmpegToolbox {
    /// Verify that all required binaries respond on PATH.
    pub async fn check_available(&self) -> Result<()> {
        for (binary, flag) in [
            (self.ffmpeg.as_str(), "-version"),
            (self.ffprobe.as_str(), "-version"),
            (self.mkvmerge.as_str(), "-V"),
        ] {
            ToolCommand::new(binary, "version check").arg(flag).execute().await?;
        }
        info!("External tools available: ffmpeg, ffprobe, mkvmerge");
        Ok(())
    }

    fn merge_command(
        &self,
        mkv_in: &Path,
        mkv_out: &Path,
        subtitle: &Path,
        language_code: &str,
        track_name: &str,
        default_flag: bool,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.mkvmerge, "subtitle mux")
            .tolerate_exit(1)
            .arg("-o")
            .path_arg(mkv_out)
            .path_arg(mkv_in)
            .arg("--language")
            .arg(format!("0:{language_code}"))
            .arg("--track-name")
            .arg(format!("0:{track_name}"));
        if default_flag {
            cmd = cmd.arg("--default-track").arg("0:yes");
        }
        cmd.path_arg(subtitle)
    }
}

#[async_trait]
impl MediaToolbox for FfmpegToolbox {
    async fn list_tracks(&self, path: &Path) -> Result<Vec<SubtitleTrack>> {
        let stdout = ToolCommand::new(&self.ffprobe, "probe subtitle streams")
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-select_streams")
            .arg("s")
            .path_arg(path)
            .execute()
            .await?;
        parse_probe_output(&stdout)
    }

    async fn extract_track(
        &self,
        path: &Path,
        track_index: i64,
        scratch: &Path,
    ) -> Result<PathBuf> {
        let tracks = self.list_tracks(path).await?;
        // ffmpeg maps subtitle streams by ordinal within the subtitle
        // selection, not by absolute stream index.
        let ordinal = tracks
            .iter()
            .position(|t| t.index == track_index)
            .ok_or_else(|| {
                AppError::User(format!("Subtitle track {track_index} not found"))
            })?;
        let track = &tracks[ordinal];

        if !is_text_codec(&track.codec) {
            return Err(AppError::Codec(format!(
                "track {track_index} is a graphical subtitle ({}), text extraction not supported",
                track.codec
            )));
        }

        let ext = native_extension(&track.codec);
        let output = scratch.join(format!("track_{track_index}.{ext}"));

        ToolCommand::new(&self.ffmpeg, "subtitle extraction")
            .arg("-y")
            .arg("-i")
            .path_arg(path)
            .arg("-map")
            .arg(format!("0:s:{ordinal}"))
            .arg("-c:s")
            .arg(ext)
            .path_arg(&output)
            .execute()
            .await?;

        info!(
            source = %path.display(),
            track = track_index,
            output = %output.display(),
            "Extracted subtitle track"
        );
        Ok(output)
    }

    async fn merge_subtitle(
        &self,
        mkv_in: &Path,
        mkv_out: &Path,
        subtitle: &Path,
        language_code: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<()> {
        self.merge_command(mkv_in, mkv_out, subtitle, language_code, track_name, default_flag)
            .execute()
            .await?;
        info!(output = %mkv_out.display(), "Muxed subtitle into MKV");
        Ok(())
    }

    async fn replace_in_place(
        &self,
        mkv: &Path,
        subtitle: &Path,
        language_code: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<()> {
        let parent = mkv
            .parent()
            .ok_or_else(|| AppError::User(format!("{} has no parent directory", mkv.display())))?;
        let stem = mkv
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        // Sibling temp file keeps the final rename on one filesystem.
        let staging = parent.join(format!(".{stem}.muxing.mkv"));

        let merged = self
            .merge_command(mkv, &staging, subtitle, language_code, track_name, default_flag)
            .execute()
            .await;
        if let Err(e) = merged {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        move_file(&staging, mkv).await?;
        info!(target = %mkv.display(), "Replaced MKV in place");
        Ok(())
    }
}
