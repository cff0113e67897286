//! Skip oracle: decides whether a `(file, target_language)` pair warrants a
//! translation task, with a reason when it does not.

use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::db::{history, tasks};
use crate::error::Result;
use crate::lang;
use crate::media::MediaToolbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyHasTrack,
    OutputExists,
    History,
    FilenameMarker,
    InProgress,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyHasTrack => "already_has_track",
            SkipReason::OutputExists => "output_exists",
            SkipReason::History => "history",
            SkipReason::FilenameMarker => "filename_marker",
            SkipReason::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Proceed,
    Skip(SkipReason),
}

impl SkipDecision {
    pub fn should_proceed(&self) -> bool {
        matches!(self, SkipDecision::Proceed)
    }
}

/// History records key on the canonical path so the same file reached
/// through different mounts or symlinks is recognized.
pub fn canonical_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Output files the pipeline would produce for this source under the
/// current settings.
pub fn predicted_outputs(path: &Path, target_language: &str, settings: &Settings) -> Vec<PathBuf> {
    let Some(parent) = path.parent() else {
        return Vec::new();
    };
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) else {
        return Vec::new();
    };
    let is_mkv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false);

    match settings.subtitle_output_format.as_str() {
        "srt" | "ass" => {
            let tag = lang::filename_tag(target_language);
            vec![parent.join(format!(
                "{stem}.{tag}.{}",
                settings.subtitle_output_format
            ))]
        }
        _ if is_mkv && !settings.overwrite_mkv => {
            vec![parent.join(format!("{stem}.translated.mkv"))]
        }
        // In-place overwrite produces no new file; a subtitle source with
        // MKV output fails in the pipeline instead.
        _ => Vec::new(),
    }
}

pub struct SkipOracle {
    db: SqlitePool,
    toolbox: Arc<dyn MediaToolbox>,
}

impl SkipOracle {
    pub fn new(db: SqlitePool, toolbox: Arc<dyn MediaToolbox>) -> Self {
        Self { db, toolbox }
    }

    /// Evaluate the skip rules in order. The decision is pure with respect
    /// to the observed state, so evaluating twice yields the same answer.
    pub async fn evaluate(
        &self,
        path: &Path,
        target_language: &str,
        force_override: bool,
        settings: &Settings,
    ) -> Result<SkipDecision> {
        if force_override {
            return Ok(SkipDecision::Proceed);
        }

        let path_str = path.to_string_lossy();

        // An MKV that already carries a subtitle track in the target
        // language needs no work. Probe failures are not skips.
        let is_mkv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mkv"))
            .unwrap_or(false);
        if is_mkv {
            let wanted = lang::iso639_code(target_language);
            match self.toolbox.list_tracks(path).await {
                Ok(tracks) => {
                    let found = tracks.iter().any(|t| {
                        t.language
                            .as_deref()
                            .map(|l| l.eq_ignore_ascii_case(wanted))
                            .unwrap_or(false)
                    });
                    if found {
                        return Ok(SkipDecision::Skip(SkipReason::AlreadyHasTrack));
                    }
                }
                Err(e) => {
                    warn!(path = %path_str, "Track probe failed during skip check: {e}");
                }
            }
        }

        for output in predicted_outputs(path, target_language, settings) {
            if output.exists() {
                debug!(output = %output.display(), "Skip: output already present");
                return Ok(SkipDecision::Skip(SkipReason::OutputExists));
            }
        }

        if history::exists(&self.db, &canonical_key(path), target_language).await? {
            return Ok(SkipDecision::Skip(SkipReason::History));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if lang::has_language_marker(&file_name, target_language) {
            return Ok(SkipDecision::Skip(SkipReason::FilenameMarker));
        }

        if tasks::has_active(&self.db, &path_str, target_language).await? {
            return Ok(SkipDecision::Skip(SkipReason::InProgress));
        }

        Ok(SkipDecision::Proceed)
    }
}
