//! Per-task translation pipeline: extract, chunk, translate, assemble, place.
//!
//! One pipeline runs inside one scheduler worker slot. Cancel and pause are
//! observed at defined suspension points: between chunks, before external
//! tool invocations, and before filesystem writes. An in-flight LLM request
//! is aborted on cancel and counts as not applied.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SettingsStore;
use crate::db::{history, tasks, tasks::Task};
use crate::error::{AppError, Result};
use crate::events::ProgressBus;
use crate::lang;
use crate::llm::LlmAdapter;
use crate::media::{self, MediaToolbox, SubtitleTrack};
use crate::skip::canonical_key;
use crate::subtitle::{compose_bilingual, SubtitleDocument, SubtitleFormat};

/// Character budget per translation chunk.
pub const CHUNK_CHAR_BUDGET: usize = 3000;
/// Upper bound on dialogue units per chunk.
pub const CHUNK_MAX_UNITS: usize = 50;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Cooperative control signals for one running task.
#[derive(Clone, Default)]
pub struct TaskControl {
    pub cancel: CancellationToken,
    pub pause: CancellationToken,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }
}

/// How a finished pipeline run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { output_path: PathBuf },
    Cancelled,
    Paused,
}

/// Shared dependencies for running pipelines.
#[derive(Clone)]
pub struct PipelineContext {
    pub db: SqlitePool,
    pub bus: ProgressBus,
    pub settings: Arc<SettingsStore>,
    pub toolbox: Arc<dyn MediaToolbox>,
    pub scratch_root: PathBuf,
}

impl PipelineContext {
    pub fn scratch_dir(&self, task_id: i64) -> PathBuf {
        self.scratch_root.join(task_id.to_string())
    }
}

/// Translation state persisted when a pause request is honored.
#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    chunks_done: usize,
    translated: Vec<String>,
}

/// Run the pipeline for one task. The scratch arena is released on every
/// terminal outcome; a paused task keeps it (the checkpoint lives there).
pub async fn run(
    ctx: &PipelineContext,
    task: &Task,
    control: &TaskControl,
    adapter: &dyn LlmAdapter,
) -> Result<PipelineOutcome> {
    let scratch = ctx.scratch_dir(task.id);
    tokio::fs::create_dir_all(&scratch).await?;

    let result = run_inner(ctx, task, control, adapter, &scratch).await;

    if !matches!(result, Ok(PipelineOutcome::Paused)) {
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(task_id = task.id, "Scratch cleanup failed: {e}");
        }
    }
    result
}

async fn run_inner(
    ctx: &PipelineContext,
    task: &Task,
    control: &TaskControl,
    adapter: &dyn LlmAdapter,
    scratch: &Path,
) -> Result<PipelineOutcome> {
    let settings = ctx.settings.snapshot();
    let source_path = Path::new(&task.file_path);
    if !source_path.exists() {
        return Err(AppError::User(format!(
            "File not found: {}",
            task.file_path
        )));
    }

    ctx.bus.status(task.id, tasks::TaskStatus::Processing);

    let source_is_mkv = source_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false);

    // Extraction: MKV sources need their subtitle track pulled into scratch.
    let working_sub = if source_is_mkv {
        if control.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        let all_tracks = ctx.toolbox.list_tracks(source_path).await?;
        let track_index = select_track(&all_tracks, task)?;
        info!(task_id = task.id, track = track_index, "Extracting subtitle track");
        ctx.toolbox
            .extract_track(source_path, track_index, scratch)
            .await?
    } else {
        source_path.to_path_buf()
    };

    // Chunking.
    let mut doc = SubtitleDocument::load(&working_sub).await?;
    if doc.is_empty() {
        return Err(AppError::Codec("subtitle file has no dialogue".to_string()));
    }
    let originals = doc.texts();
    let chunks = chunk_ranges(&originals, CHUNK_CHAR_BUDGET, CHUNK_MAX_UNITS);
    let placement = resolve_placement(source_path, source_is_mkv, &task.target_language, &settings)?;

    // A checkpoint from an earlier pause resumes translation mid-stream.
    let mut translated: Vec<String> = Vec::new();
    let mut first_chunk = 0;
    if let Some(checkpoint) = load_checkpoint(scratch).await {
        let expected: usize = chunks
            .iter()
            .take(checkpoint.chunks_done)
            .map(|r| r.len())
            .sum();
        if checkpoint.chunks_done <= chunks.len() && checkpoint.translated.len() == expected {
            info!(
                task_id = task.id,
                chunks_done = checkpoint.chunks_done,
                "Resuming from checkpoint"
            );
            first_chunk = checkpoint.chunks_done;
            translated = checkpoint.translated;
        } else {
            warn!(task_id = task.id, "Checkpoint does not match source, restarting");
        }
        let _ = tokio::fs::remove_file(scratch.join(CHECKPOINT_FILE)).await;
    }
    if first_chunk == 0 {
        tasks::set_progress(&ctx.db, task.id, 0).await?;
        ctx.bus.progress(task.id, 0);
    }

    let source_language = task
        .source_language
        .clone()
        .unwrap_or_else(|| settings.source_language.clone());

    // Translation, strictly in source order.
    for (i, range) in chunks.iter().enumerate().skip(first_chunk) {
        if control.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        if control.pause.is_cancelled() {
            save_checkpoint(
                scratch,
                &Checkpoint {
                    chunks_done: i,
                    translated: translated.clone(),
                },
            )
            .await?;
            info!(task_id = task.id, chunks_done = i, "Paused at chunk boundary");
            return Ok(PipelineOutcome::Paused);
        }

        let batch = &originals[range.clone()];
        let texts = tokio::select! {
            result = adapter.translate_batch(batch, &source_language, &task.target_language) => result?,
            _ = control.cancel.cancelled() => {
                return Ok(PipelineOutcome::Cancelled);
            }
        };
        if texts.len() != batch.len() {
            return Err(AppError::Consistency(format!(
                "translated {} of {} lines in chunk {}",
                texts.len(),
                batch.len(),
                i + 1
            )));
        }
        translated.extend(texts);

        let progress = (95 * (i + 1) / chunks.len()) as i64;
        tasks::set_progress(&ctx.db, task.id, progress).await?;
        ctx.bus.progress(task.id, progress);
    }

    // Assembly.
    if control.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled);
    }
    let final_texts = if settings.bilingual_output {
        compose_bilingual(&translated, &originals, doc.format())
    } else {
        translated
    };
    doc.apply_texts(&final_texts);

    let subtitle_format = placement.subtitle_format(doc.format());
    let out_doc = doc.convert_to(subtitle_format);
    let staged = scratch.join(format!("translated.{}", subtitle_format.extension()));
    out_doc.save(&staged).await?;

    // Placement.
    if control.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled);
    }
    let language_code = lang::iso639_code(&task.target_language);
    let track_name = if settings.bilingual_output {
        format!("{} (Bilingual)", task.target_language)
    } else {
        task.target_language.clone()
    };

    let output_path = match &placement {
        Placement::SubtitleFile { dest } => {
            media::move_file(&staged, dest).await?;
            dest.clone()
        }
        Placement::MergeMkv { dest } => {
            let staged_mkv = scratch.join("output.mkv");
            ctx.toolbox
                .merge_subtitle(source_path, &staged_mkv, &staged, language_code, &track_name, false)
                .await?;
            media::move_file(&staged_mkv, dest).await?;
            dest.clone()
        }
        Placement::ReplaceMkv => {
            ctx.toolbox
                .replace_in_place(source_path, &staged, language_code, &track_name, false)
                .await?;
            source_path.to_path_buf()
        }
    };

    history::record(
        &ctx.db,
        &canonical_key(source_path),
        &task.target_language,
        &output_path.to_string_lossy(),
    )
    .await?;

    info!(task_id = task.id, output = %output_path.display(), "Translation completed");
    Ok(PipelineOutcome::Completed { output_path })
}

/// Where the translated subtitle ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    SubtitleFile { dest: PathBuf },
    MergeMkv { dest: PathBuf },
    ReplaceMkv,
}

impl Placement {
    /// The subtitle format serialized for this placement. Muxed outputs keep
    /// the source format; file outputs follow the configured extension.
    fn subtitle_format(&self, source_format: SubtitleFormat) -> SubtitleFormat {
        match self {
            Placement::SubtitleFile { dest } => SubtitleFormat::from_path(dest)
                .unwrap_or(source_format),
            _ => source_format,
        }
    }
}

fn resolve_placement(
    source_path: &Path,
    source_is_mkv: bool,
    target_language: &str,
    settings: &crate::config::Settings,
) -> Result<Placement> {
    let parent = source_path
        .parent()
        .ok_or_else(|| AppError::User(format!("{} has no parent directory", source_path.display())))?;
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::User(format!("{} has no file stem", source_path.display())))?;

    match settings.subtitle_output_format.as_str() {
        format @ ("srt" | "ass") => {
            let tag = lang::filename_tag(target_language);
            Ok(Placement::SubtitleFile {
                dest: parent.join(format!("{stem}.{tag}.{format}")),
            })
        }
        _ if source_is_mkv && settings.overwrite_mkv => Ok(Placement::ReplaceMkv),
        _ if source_is_mkv => Ok(Placement::MergeMkv {
            dest: parent.join(format!("{stem}.translated.mkv")),
        }),
        _ => Err(AppError::User(
            "invalid_output_format: MKV output requires an MKV source".to_string(),
        )),
    }
}

/// Pick the subtitle track to translate: the explicitly requested one, else
/// the first text track in the task's source language, else the first text
/// track not already in the target language, else the first text track.
fn select_track(all_tracks: &[SubtitleTrack], task: &Task) -> Result<i64> {
    if let Some(index) = task.subtitle_track {
        if all_tracks.iter().any(|t| t.index == index) {
            return Ok(index);
        }
        return Err(AppError::User(format!("Subtitle track {index} not found")));
    }

    let text_tracks: Vec<&SubtitleTrack> = all_tracks
        .iter()
        .filter(|t| media::is_text_codec(&t.codec))
        .collect();
    if text_tracks.is_empty() {
        return Err(AppError::Codec(
            "no text subtitle tracks found".to_string(),
        ));
    }

    if let Some(source) = task.source_language.as_deref() {
        if source != "auto" {
            let wanted = lang::iso639_code(source);
            if let Some(track) = text_tracks.iter().find(|t| {
                t.language
                    .as_deref()
                    .map(|l| l.eq_ignore_ascii_case(wanted))
                    .unwrap_or(false)
            }) {
                return Ok(track.index);
            }
        }
    }

    let target_code = lang::iso639_code(&task.target_language);
    if let Some(track) = text_tracks.iter().find(|t| {
        t.language
            .as_deref()
            .map(|l| !l.eq_ignore_ascii_case(target_code))
            .unwrap_or(true)
    }) {
        return Ok(track.index);
    }

    Ok(text_tracks[0].index)
}

/// Split unit texts into contiguous chunks bounded by a character budget and
/// a unit count. Chunks never overlap and preserve global order.
pub fn chunk_ranges(texts: &[String], char_budget: usize, max_units: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if i > start && (chars + len > char_budget || i - start >= max_units) {
            ranges.push(start..i);
            start = i;
            chars = 0;
        }
        chars += len;
    }
    if start < texts.len() {
        ranges.push(start..texts.len());
    }
    ranges
}

async fn load_checkpoint(scratch: &Path) -> Option<Checkpoint> {
    let content = tokio::fs::read_to_string(scratch.join(CHECKPOINT_FILE))
        .await
        .ok()?;
    serde_json::from_str(&content).ok()
}

async fn save_checkpoint(scratch: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let content = serde_json::to_string(checkpoint)?;
    tokio::fs::write(scratch.join(CHECKPOINT_FILE), content).await?;
    Ok(())
}

/// Whether a paused task left a resumable checkpoint behind.
pub fn has_checkpoint(scratch_root: &Path, task_id: i64) -> bool {
    scratch_root
        .join(task_id.to_string())
        .join(CHECKPOINT_FILE)
        .exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsStore;
    use crate::db::{self, tasks::NewTask};
    use crate::error::AppError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubAdapter {
        map: HashMap<String, String>,
        calls: AtomicUsize,
        pause_after: Option<(usize, TaskControl)>,
    }

    impl StubAdapter {
        fn mapping(pairs: &[(&str, &str)]) -> Self {
            Self {
                map: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
                pause_after: None,
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for StubAdapter {
        async fn translate_batch(
            &self,
            texts: &[String],
            _source_language: &str,
            _target_language: &str,
        ) -> crate::error::Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, control)) = &self.pause_after {
                if call == *after {
                    control.pause.cancel();
                }
            }
            Ok(texts
                .iter()
                .map(|t| self.map.get(t).cloned().unwrap_or_else(|| format!("T:{t}")))
                .collect())
        }

        async fn healthcheck(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct NoopToolbox;

    #[async_trait]
    impl MediaToolbox for NoopToolbox {
        async fn list_tracks(&self, _path: &Path) -> crate::error::Result<Vec<SubtitleTrack>> {
            Ok(Vec::new())
        }
        async fn extract_track(
            &self,
            _path: &Path,
            _track_index: i64,
            _scratch: &Path,
        ) -> crate::error::Result<PathBuf> {
            unimplemented!("subtitle-file tests never extract")
        }
        async fn merge_subtitle(
            &self,
            _mkv_in: &Path,
            _mkv_out: &Path,
            _subtitle: &Path,
            _language_code: &str,
            _track_name: &str,
            _default_flag: bool,
        ) -> crate::error::Result<()> {
            unimplemented!("subtitle-file tests never mux")
        }
        async fn replace_in_place(
            &self,
            _mkv: &Path,
            _subtitle: &Path,
            _language_code: &str,
            _track_name: &str,
            _default_flag: bool,
        ) -> crate::error::Result<()> {
            unimplemented!("subtitle-file tests never mux")
        }
    }

    async fn context(dir: &TempDir, entries: &[(&str, &str)]) -> PipelineContext {
        let pool = db::test_pool().await;
        let store = SettingsStore::load(pool.clone()).await.unwrap();
        let entries: Vec<(String, String)> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        store.update(&entries).await.unwrap();
        PipelineContext {
            db: pool,
            bus: ProgressBus::default(),
            settings: Arc::new(store),
            toolbox: Arc::new(NoopToolbox),
            scratch_root: dir.path().join("scratch"),
        }
    }

    async fn make_task(ctx: &PipelineContext, path: &Path) -> Task {
        tasks::insert(
            &ctx.db,
            &NewTask {
                file_path: path.to_string_lossy().into_owned(),
                file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
                target_language: "Chinese".to_string(),
                llm_provider: "openai".to_string(),
                subtitle_track: None,
                force_override: false,
            },
        )
        .await
        .unwrap()
    }

    const SRT_THREE: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n\n3\n00:00:05,000 --> 00:00:06,000\nGoodbye\n\n";

    #[tokio::test]
    async fn test_srt_happy_path() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.srt");
        std::fs::write(&source, SRT_THREE).unwrap();

        let ctx = context(&dir, &[("subtitle_output_format", "srt")]).await;
        let task = make_task(&ctx, &source).await;
        let adapter = StubAdapter::mapping(&[
            ("Hello", "你好"),
            ("World", "世界"),
            ("Goodbye", "再见"),
        ]);

        let outcome = run(&ctx, &task, &TaskControl::new(), &adapter).await.unwrap();
        let expected_output = dir.path().join("a.zh-Hans.srt");
        assert_eq!(
            outcome,
            PipelineOutcome::Completed {
                output_path: expected_output.clone()
            }
        );

        let written = std::fs::read_to_string(&expected_output).unwrap();
        assert!(written.contains("00:00:01,000 --> 00:00:02,000\n你好"));
        assert!(written.contains("00:00:03,000 --> 00:00:04,000\n世界"));
        assert!(written.contains("00:00:05,000 --> 00:00:06,000\n再见"));
        assert!(!written.contains("Hello"));

        // History recorded; scratch released.
        assert!(
            history::exists(&ctx.db, &canonical_key(&source), "Chinese")
                .await
                .unwrap()
        );
        assert!(!ctx.scratch_dir(task.id).exists());
    }

    #[tokio::test]
    async fn test_bilingual_ass_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.ass");
        let content = "[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,Hello\n";
        std::fs::write(&source, content).unwrap();

        let ctx = context(
            &dir,
            &[
                ("subtitle_output_format", "ass"),
                ("bilingual_output", "true"),
            ],
        )
        .await;
        let mut task = make_task(&ctx, &source).await;
        task.force_override = true;
        let adapter = StubAdapter::mapping(&[("Hello", "你好")]);

        run(&ctx, &task, &TaskControl::new(), &adapter).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("a.zh-Hans.ass")).unwrap();
        assert!(written.contains("Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,你好\\NHello"));
    }

    #[tokio::test]
    async fn test_pause_checkpoint_and_resume() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("long.srt");
        // Ten oversized cues force one chunk per cue.
        let mut content = String::new();
        for i in 0..10 {
            content.push_str(&format!(
                "{}\n00:00:{:02},000 --> 00:00:{:02},500\nline{} {}\n\n",
                i + 1,
                i + 1,
                i + 1,
                i,
                "x".repeat(2000)
            ));
        }
        std::fs::write(&source, &content).unwrap();

        let ctx = context(&dir, &[("subtitle_output_format", "srt")]).await;
        let task = make_task(&ctx, &source).await;

        // Uninterrupted reference run on a sibling copy.
        let reference = dir.path().join("ref.srt");
        std::fs::write(&reference, &content).unwrap();
        let ref_task = make_task(&ctx, &reference).await;
        let adapter = StubAdapter::mapping(&[]);
        run(&ctx, &ref_task, &TaskControl::new(), &adapter).await.unwrap();
        let expected = std::fs::read(dir.path().join("ref.zh-Hans.srt")).unwrap();

        // Interrupted run: pause request lands after chunk 4 completes.
        let control = TaskControl::new();
        let adapter = StubAdapter {
            map: HashMap::new(),
            calls: AtomicUsize::new(0),
            pause_after: Some((4, control.clone())),
        };
        let outcome = run(&ctx, &task, &control, &adapter).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Paused);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
        assert!(has_checkpoint(&ctx.scratch_root, task.id));

        let row = tasks::get(&ctx.db, task.id).await.unwrap().unwrap();
        assert_eq!(row.progress, 38); // floor(95 * 4 / 10)

        // Resume: chunks 1-4 are not resent, output matches the reference.
        let adapter = StubAdapter::mapping(&[]);
        let outcome = run(&ctx, &task, &TaskControl::new(), &adapter).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 6);

        let resumed = std::fs::read(dir.path().join("long.zh-Hans.srt")).unwrap();
        assert_eq!(resumed, expected);
        assert!(!ctx.scratch_dir(task.id).exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.srt");
        std::fs::write(&source, SRT_THREE).unwrap();

        let ctx = context(&dir, &[("subtitle_output_format", "srt")]).await;
        let task = make_task(&ctx, &source).await;
        let control = TaskControl::new();
        control.cancel.cancel();

        let adapter = StubAdapter::mapping(&[]);
        let outcome = run(&ctx, &task, &control, &adapter).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Cancelled);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
        assert!(!ctx.scratch_dir(task.id).exists());
        assert!(!dir.path().join("a.zh-Hans.srt").exists());
    }

    #[tokio::test]
    async fn test_subtitle_source_with_mkv_output_fails() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.srt");
        std::fs::write(&source, SRT_THREE).unwrap();

        let ctx = context(&dir, &[("subtitle_output_format", "mkv")]).await;
        let task = make_task(&ctx, &source).await;
        let adapter = StubAdapter::mapping(&[]);

        let err = run(&ctx, &task, &TaskControl::new(), &adapter)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_output_format"));
        assert!(!ctx.scratch_dir(task.id).exists());
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[]).await;
        let task = make_task(&ctx, &dir.path().join("absent.srt")).await;
        let adapter = StubAdapter::mapping(&[]);
        let err = run(&ctx, &task, &TaskControl::new(), &adapter)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::User(_)));
    }

    #[test]
    fn test_chunk_ranges_budget_and_cap() {
        let small: Vec<String> = (0..120).map(|i| format!("line {i}")).collect();
        let ranges = chunk_ranges(&small, 3000, 50);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], 0..50);
        assert_eq!(ranges[1], 50..100);
        assert_eq!(ranges[2], 100..120);

        let big: Vec<String> = (0..4).map(|_| "x".repeat(2000)).collect();
        let ranges = chunk_ranges(&big, 3000, 50);
        assert_eq!(ranges.len(), 4);

        let one = vec!["only".to_string()];
        assert_eq!(chunk_ranges(&one, 3000, 50), vec![0..1]);
        assert!(chunk_ranges(&[], 3000, 50).is_empty());
    }

    #[test]
    fn test_select_track_policy() {
        let tracks = vec![
            SubtitleTrack {
                index: 1,
                codec: "hdmv_pgs_subtitle".to_string(),
                language: Some("eng".to_string()),
                title: None,
            },
            SubtitleTrack {
                index: 2,
                codec: "subrip".to_string(),
                language: Some("chi".to_string()),
                title: None,
            },
            SubtitleTrack {
                index: 3,
                codec: "subrip".to_string(),
                language: Some("eng".to_string()),
                title: None,
            },
        ];

        let mut task = template_task();
        // Explicit track wins.
        task.subtitle_track = Some(3);
        assert_eq!(select_track(&tracks, &task).unwrap(), 3);
        task.subtitle_track = Some(9);
        assert!(select_track(&tracks, &task).is_err());

        // Source language preference.
        task.subtitle_track = None;
        task.source_language = Some("English".to_string());
        assert_eq!(select_track(&tracks, &task).unwrap(), 3);

        // Otherwise the first text track not in the target language.
        task.source_language = None;
        assert_eq!(select_track(&tracks, &task).unwrap(), 3);

        // Graphical-only containers are rejected.
        assert!(select_track(&tracks[..1], &task).is_err());
    }

    fn template_task() -> Task {
        Task {
            id: 1,
            file_path: "/m/a.mkv".to_string(),
            file_name: "a.mkv".to_string(),
            status: tasks::TaskStatus::Processing,
            progress: 0,
            source_language: None,
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
            subtitle_track: None,
            force_override: false,
            error_message: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}
