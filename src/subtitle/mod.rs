// Subtitle codec
//
// This module parses and serializes the two text subtitle formats the
// service handles:
// - Srt: numbered cue blocks with `-->` timing lines
// - Ass: sectioned script files with `Dialogue:` event lines
//
// Documents preserve the raw structure they were parsed from, so an
// untranslated file round-trips byte-identically (modulo line-ending
// normalization). Timecodes are additionally parsed so documents can be
// converted between formats when the output format differs from the source.

pub mod ass;
pub mod srt;

use std::path::Path;

pub use ass::AssDocument;
pub use srt::SrtDocument;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Ass,
}

impl SubtitleFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| {
            AppError::Codec(format!("unsupported subtitle format: {}", path.display()))
        })
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "srt" => Some(SubtitleFormat::Srt),
            "ass" | "ssa" => Some(SubtitleFormat::Ass),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Ass => "ass",
        }
    }

    /// Line separator used inside one dialogue unit's text.
    pub fn line_separator(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "\n",
            SubtitleFormat::Ass => "\\N",
        }
    }
}

/// A parsed subtitle file of either format.
#[derive(Debug, Clone)]
pub enum SubtitleDocument {
    Srt(SrtDocument),
    Ass(AssDocument),
}

impl SubtitleDocument {
    pub fn parse(format: SubtitleFormat, content: &str) -> Result<Self> {
        match format {
            SubtitleFormat::Srt => Ok(SubtitleDocument::Srt(SrtDocument::parse(content)?)),
            SubtitleFormat::Ass => Ok(SubtitleDocument::Ass(AssDocument::parse(content)?)),
        }
    }

    /// Read and parse a file, sniffing the character encoding.
    pub async fn load(path: &Path) -> Result<Self> {
        let format = SubtitleFormat::from_path(path)?;
        let bytes = tokio::fs::read(path).await?;
        let content = decode_bytes(&bytes);
        Self::parse(format, &content)
    }

    pub fn format(&self) -> SubtitleFormat {
        match self {
            SubtitleDocument::Srt(_) => SubtitleFormat::Srt,
            SubtitleDocument::Ass(_) => SubtitleFormat::Ass,
        }
    }

    /// Dialogue text payloads, in source order.
    pub fn texts(&self) -> Vec<String> {
        match self {
            SubtitleDocument::Srt(doc) => doc.texts(),
            SubtitleDocument::Ass(doc) => doc.texts(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SubtitleDocument::Srt(doc) => doc.cues.len(),
            SubtitleDocument::Ass(doc) => doc.dialogue_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace dialogue texts in order. Extra texts are ignored; missing
    /// texts leave the trailing units untouched.
    pub fn apply_texts(&mut self, texts: &[String]) {
        match self {
            SubtitleDocument::Srt(doc) => doc.apply_texts(texts),
            SubtitleDocument::Ass(doc) => doc.apply_texts(texts),
        }
    }

    /// Convert to the target format, generating a minimal header (SRT→ASS)
    /// or stripping styling (ASS→SRT). Same-format conversion is identity.
    pub fn convert_to(self, format: SubtitleFormat) -> SubtitleDocument {
        match (self, format) {
            (doc @ SubtitleDocument::Srt(_), SubtitleFormat::Srt) => doc,
            (doc @ SubtitleDocument::Ass(_), SubtitleFormat::Ass) => doc,
            (SubtitleDocument::Srt(doc), SubtitleFormat::Ass) => {
                SubtitleDocument::Ass(ass::from_srt(&doc))
            }
            (SubtitleDocument::Ass(doc), SubtitleFormat::Srt) => {
                SubtitleDocument::Srt(srt::from_ass(&doc))
            }
        }
    }

    pub fn serialize(&self) -> String {
        match self {
            SubtitleDocument::Srt(doc) => doc.serialize(),
            SubtitleDocument::Ass(doc) => doc.serialize(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.serialize()).await?;
        Ok(())
    }
}

/// Compose bilingual unit texts: translation first, then the original,
/// joined with the format's line separator.
pub fn compose_bilingual(
    translated: &[String],
    original: &[String],
    format: SubtitleFormat,
) -> Vec<String> {
    let sep = format.line_separator();
    translated
        .iter()
        .zip(original.iter())
        .map(|(t, o)| format!("{t}{sep}{o}"))
        .collect()
}

/// Decode subtitle bytes to text.
///
/// Recognizes UTF-8 and UTF-16 LE/BE byte-order marks; BOM-less input is
/// tried as UTF-8 first, then checked for the NUL-byte pattern of UTF-16,
/// and finally decoded lossily.
pub fn decode_bytes(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return decode_utf16(&bytes[2..], true);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return decode_utf16(&bytes[2..], false);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    // BOM-less UTF-16 shows up as NUL bytes on every other position.
    let sample = &bytes[..bytes.len().min(512)];
    let nul_even = sample.iter().step_by(2).filter(|&&b| b == 0).count();
    let nul_odd = sample.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    let half = sample.len() / 2;
    if half > 0 {
        if nul_odd * 4 >= half * 3 {
            return decode_utf16(bytes, true);
        }
        if nul_even * 4 >= half * 3 {
            return decode_utf16(bytes, false);
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Normalize line endings to `\n` and drop a stray leading BOM character.
pub(crate) fn normalize_lines(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    content.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            SubtitleFormat::from_path(Path::new("/m/a.srt")).unwrap(),
            SubtitleFormat::Srt
        );
        assert_eq!(
            SubtitleFormat::from_path(Path::new("/m/a.SSA")).unwrap(),
            SubtitleFormat::Ass
        );
        assert!(SubtitleFormat::from_path(Path::new("/m/a.vtt")).is_err());
        assert!(SubtitleFormat::from_path(Path::new("/m/a")).is_err());
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("hello".as_bytes());
        assert_eq!(decode_bytes(&bytes), "hello");
    }

    #[test]
    fn test_decode_utf16_le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "héllo".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_bytes(&bytes), "héllo");
    }

    #[test]
    fn test_decode_utf16_be_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "héllo".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_bytes(&bytes), "héllo");
    }

    #[test]
    fn test_decode_plain_utf8() {
        assert_eq!(decode_bytes("你好".as_bytes()), "你好");
    }

    #[test]
    fn test_decode_bomless_utf16_heuristic() {
        let mut bytes = Vec::new();
        for unit in "1\n00:00:00,000 --> 00:00:01,000\nHi\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert!(decode_bytes(&bytes).contains("00:00:00,000"));
    }

    #[test]
    fn test_compose_bilingual_separators() {
        let translated = vec!["你好".to_string()];
        let original = vec!["Hello".to_string()];
        assert_eq!(
            compose_bilingual(&translated, &original, SubtitleFormat::Ass),
            vec!["你好\\NHello".to_string()]
        );
        assert_eq!(
            compose_bilingual(&translated, &original, SubtitleFormat::Srt),
            vec!["你好\nHello".to_string()]
        );
    }
}
