//! SubRip (.srt) parsing and serialization.

use super::{ass::AssDocument, normalize_lines};
use crate::error::{AppError, Result};

/// One numbered cue. The index and timing lines are kept as written so an
/// untouched document serializes back byte-identically.
#[derive(Debug, Clone)]
pub struct SrtCue {
    pub index_line: String,
    pub timing_line: String,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SrtDocument {
    pub cues: Vec<SrtCue>,
}

impl SrtDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let content = normalize_lines(content);
        let mut cues = Vec::new();
        let mut block: Vec<&str> = Vec::new();

        for line in content.lines().chain(std::iter::once("")) {
            if line.trim().is_empty() {
                if !block.is_empty() {
                    cues.push(parse_block(&block)?);
                    block.clear();
                }
            } else {
                block.push(line);
            }
        }

        Ok(Self { cues })
    }

    pub fn texts(&self) -> Vec<String> {
        self.cues.iter().map(|c| c.text.clone()).collect()
    }

    pub fn apply_texts(&mut self, texts: &[String]) {
        for (cue, text) in self.cues.iter_mut().zip(texts.iter()) {
            cue.text = text.clone();
        }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for cue in &self.cues {
            out.push_str(&cue.index_line);
            out.push('\n');
            out.push_str(&cue.timing_line);
            out.push('\n');
            out.push_str(&cue.text);
            out.push_str("\n\n");
        }
        out
    }
}

fn parse_block(lines: &[&str]) -> Result<SrtCue> {
    // Timing is normally the second line, after the numeric index; tolerate
    // files where the index line is missing.
    let timing_pos = lines
        .iter()
        .take(2)
        .position(|l| l.contains("-->"))
        .ok_or_else(|| {
            AppError::Codec(format!("SRT cue has no timing line: {:?}", lines.first()))
        })?;

    let index_line = if timing_pos == 0 {
        String::new()
    } else {
        lines[0].to_string()
    };
    let timing_line = lines[timing_pos].to_string();
    let (start_ms, end_ms) = parse_timing(&timing_line)?;
    let text = lines[timing_pos + 1..].join("\n");

    Ok(SrtCue {
        index_line: if index_line.is_empty() {
            // Synthesize for serialization; real files always carry one.
            "0".to_string()
        } else {
            index_line
        },
        timing_line,
        text,
        start_ms,
        end_ms,
    })
}

fn parse_timing(line: &str) -> Result<(u64, u64)> {
    let mut parts = line.split("-->");
    let start = parts
        .next()
        .ok_or_else(|| AppError::Codec(format!("bad SRT timing line: {line}")))?
        .trim();
    let end_part = parts
        .next()
        .ok_or_else(|| AppError::Codec(format!("bad SRT timing line: {line}")))?
        .trim();
    // Coordinates may follow the end timecode; they are part of the raw line.
    let end = end_part.split_whitespace().next().unwrap_or(end_part);
    Ok((parse_timecode(start)?, parse_timecode(end)?))
}

/// Parse `HH:MM:SS,mmm` (comma or dot) into milliseconds.
pub fn parse_timecode(value: &str) -> Result<u64> {
    let normalized = value.replace('.', ",");
    let (clock, millis) = normalized
        .split_once(',')
        .ok_or_else(|| AppError::Codec(format!("bad SRT timecode: {value}")))?;
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() != 3 {
        return Err(AppError::Codec(format!("bad SRT timecode: {value}")));
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map_err(|_| AppError::Codec(format!("bad SRT timecode: {value}")))
    };
    let (h, m, s) = (parse(fields[0])?, parse(fields[1])?, parse(fields[2])?);
    let ms = parse(millis)?;
    Ok(((h * 60 + m) * 60 + s) * 1000 + ms)
}

/// Format milliseconds as `HH:MM:SS,mmm`.
pub fn format_timecode(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Build an SRT document from ASS events: styling override tags are
/// stripped and `\N` line breaks become real newlines.
pub fn from_ass(doc: &AssDocument) -> SrtDocument {
    let mut cues = Vec::new();
    for (i, event) in doc.dialogue_events().enumerate() {
        let text = strip_ass_markup(&event.text);
        cues.push(SrtCue {
            index_line: (i + 1).to_string(),
            timing_line: format!(
                "{} --> {}",
                format_timecode(event.start_ms),
                format_timecode(event.end_ms)
            ),
            text,
            start_ms: event.start_ms,
            end_ms: event.end_ms,
        });
    }
    SrtDocument { cues }
}

fn strip_ass_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => in_tag = true,
            '}' if in_tag => in_tag = false,
            '\\' if !in_tag => {
                match chars.peek() {
                    Some('N') | Some('n') => {
                        chars.next();
                        out.push('\n');
                    }
                    Some('h') => {
                        chars.next();
                        out.push(' ');
                    }
                    _ => out.push(c),
                }
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
