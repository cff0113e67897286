//! Advanced SubStation Alpha (.ass/.ssa) parsing and serialization.
//!
//! Only `Dialogue:` event lines are modeled; every other line (script info,
//! styles, comments) is carried through verbatim.

use super::{normalize_lines, srt::SrtDocument};
use crate::error::{AppError, Result};

/// Field count of the standard v4+ `[Events]` Format line; the text payload
/// is always the last field and may itself contain commas.
const DEFAULT_EVENT_FIELDS: usize = 10;

#[derive(Debug, Clone)]
pub struct DialogueEvent {
    /// Everything up to and including the comma before the text field.
    pub prefix: String,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone)]
enum AssLine {
    Raw(String),
    Dialogue(DialogueEvent),
}

#[derive(Debug, Clone, Default)]
pub struct AssDocument {
    lines: Vec<AssLine>,
}

impl AssDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let content = normalize_lines(content);
        let mut lines = Vec::new();
        let mut in_events = false;
        let mut event_fields = DEFAULT_EVENT_FIELDS;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') {
                in_events = trimmed.eq_ignore_ascii_case("[events]");
                lines.push(AssLine::Raw(line.to_string()));
                continue;
            }

            if in_events {
                if let Some(format) = trimmed.strip_prefix("Format:") {
                    event_fields = format.split(',').count();
                    lines.push(AssLine::Raw(line.to_string()));
                    continue;
                }
                if line.starts_with("Dialogue:") {
                    lines.push(AssLine::Dialogue(parse_dialogue(line, event_fields)?));
                    continue;
                }
            }

            lines.push(AssLine::Raw(line.to_string()));
        }

        Ok(Self { lines })
    }

    pub fn dialogue_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, AssLine::Dialogue(_)))
            .count()
    }

    pub fn dialogue_events(&self) -> impl Iterator<Item = &DialogueEvent> {
        self.lines.iter().filter_map(|l| match l {
            AssLine::Dialogue(event) => Some(event),
            AssLine::Raw(_) => None,
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.dialogue_events().map(|e| e.text.clone()).collect()
    }

    pub fn apply_texts(&mut self, texts: &[String]) {
        let mut texts = texts.iter();
        for line in &mut self.lines {
            if let AssLine::Dialogue(event) = line {
                match texts.next() {
                    Some(text) => event.text = text.clone(),
                    None => break,
                }
            }
        }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                AssLine::Raw(raw) => out.push_str(raw),
                AssLine::Dialogue(event) => {
                    out.push_str(&event.prefix);
                    out.push_str(&event.text);
                }
            }
            out.push('\n');
        }
        out
    }
}

fn parse_dialogue(line: &str, event_fields: usize) -> Result<DialogueEvent> {
    let body = &line["Dialogue:".len()..];
    let fields: Vec<&str> = body.splitn(event_fields, ',').collect();
    if fields.len() < event_fields {
        return Err(AppError::Codec(format!("malformed Dialogue line: {line}")));
    }

    let text = fields[event_fields - 1].to_string();
    let prefix_len = line.len() - text.len();
    let prefix = line[..prefix_len].to_string();

    let start_ms = parse_timecode(fields[1].trim())?;
    let end_ms = parse_timecode(fields[2].trim())?;

    Ok(DialogueEvent {
        prefix,
        text,
        start_ms,
        end_ms,
    })
}

/// Parse `H:MM:SS.cc` (centiseconds) into milliseconds.
pub fn parse_timecode(value: &str) -> Result<u64> {
    let (clock, centis) = value
        .split_once('.')
        .ok_or_else(|| AppError::Codec(format!("bad ASS timecode: {value}")))?;
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() != 3 {
        return Err(AppError::Codec(format!("bad ASS timecode: {value}")));
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map_err(|_| AppError::Codec(format!("bad ASS timecode: {value}")))
    };
    let (h, m, s) = (parse(fields[0])?, parse(fields[1])?, parse(fields[2])?);
    let cs = parse(centis)?;
    Ok(((h * 60 + m) * 60 + s) * 1000 + cs * 10)
}

/// Format milliseconds as `H:MM:SS.cc`.
pub fn format_timecode(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;
    format!("{hours}:{minutes:02}:{secs:02}.{centis:02}")
}

/// Build an ASS document from SRT cues with a minimal v4+ header.
pub fn from_srt(doc: &SrtDocument) -> AssDocument {
    let mut lines = vec![
        AssLine::Raw("[Script Info]".to_string()),
        AssLine::Raw("ScriptType: v4.00+".to_string()),
        AssLine::Raw("WrapStyle: 0".to_string()),
        AssLine::Raw("ScaledBorderAndShadow: yes".to_string()),
        AssLine::Raw(String::new()),
        AssLine::Raw("[V4+ Styles]".to_string()),
        AssLine::Raw(
            "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, \
             OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, \
             ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, \
             MarginL, MarginR, MarginV, Encoding"
                .to_string(),
        ),
        AssLine::Raw(
            "Style: Default,Arial,20,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,\
             0,0,0,0,100,100,0,0,1,2,2,2,10,10,10,1"
                .to_string(),
        ),
        AssLine::Raw(String::new()),
        AssLine::Raw("[Events]".to_string()),
        AssLine::Raw(
            "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text"
                .to_string(),
        ),
    ];

    for cue in &doc.cues {
        let prefix = format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,",
            format_timecode(cue.start_ms),
            format_timecode(cue.end_ms)
        );
        lines.push(AssLine::Dialogue(DialogueEvent {
            prefix,
            text: cue.text.replace('\n', "\\N"),
            start_ms: cue.start_ms,
            end_ms: cue.end_ms,
        }));
    }

    AssDocument { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Script Info]\nTitle: Test\nScriptType: v4.00+\n\n[V4+ Styles]\nFormat: Name, Fontname, Fontsize\nStyle: Default,Arial,20\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello\nDialogue: 0,0:00:03.00,0:00:04.00,Default,,0,0,0,,{\\an8}World, again\n";

    #[test]
    fn test_parse_dialogue_events() {
        let doc = AssDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.dialogue_count(), 2);
        let texts = doc.texts();
        assert_eq!(texts[0], "Hello");
        // Commas inside the text field belong to the text.
        assert_eq!(texts[1], "{\\an8}World, again");

        let events: Vec<_> = doc.dialogue_events().collect();
        assert_eq!(events[0].start_ms, 1000);
        assert_eq!(events[0].end_ms, 2500);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let doc = AssDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.serialize(), SAMPLE);
    }

    #[test]
    fn test_apply_texts_keeps_prefix() {
        let mut doc = AssDocument::parse(SAMPLE).unwrap();
        doc.apply_texts(&["你好".to_string(), "世界".to_string()]);
        let out = doc.serialize();
        assert!(out.contains("Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,你好\n"));
        assert!(out.contains("Dialogue: 0,0:00:03.00,0:00:04.00,Default,,0,0,0,,世界\n"));
        // Non-dialogue lines untouched.
        assert!(out.starts_with("[Script Info]\nTitle: Test"));
    }

    #[test]
    fn test_timecode_parse_and_format() {
        assert_eq!(parse_timecode("0:00:01.00").unwrap(), 1000);
        assert_eq!(parse_timecode("1:02:03.45").unwrap(), 3_723_450);
        assert_eq!(format_timecode(3_723_450), "1:02:03.45");
        assert_eq!(format_timecode(1000), "0:00:01.00");
    }

    #[test]
    fn test_from_srt_conversion() {
        let srt = SrtDocument::parse(
            "1\n00:00:01,000 --> 00:00:02,000\nHello\nthere\n\n",
        )
        .unwrap();
        let ass = from_srt(&srt);
        let out = ass.serialize();
        assert!(out.contains("[Events]"));
        assert!(out.contains("Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,Hello\\Nthere"));
        assert_eq!(ass.dialogue_count(), 1);
    }

    #[test]
    fn test_malformed_dialogue_rejected() {
        let bad = "[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00\n";
        assert!(AssDocument::parse(bad).is_err());
    }
}
