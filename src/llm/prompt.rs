//! Prompt assembly and response parsing for batch translation.
//!
//! The model receives a numbered list and must return translations with the
//! same `[n]` numbering. The parser reports exactly what came back; count
//! enforcement (and batch halving) happens in the adapter.

pub const SYSTEM_PROMPT: &str = "You are a professional subtitle translator. \
Translate accurately while maintaining natural flow.";

/// Build the numbered batch translation prompt.
pub fn batch_prompt(texts: &[String], source_language: &str, target_language: &str) -> String {
    let source_clause = if source_language == "auto" || source_language.is_empty() {
        String::new()
    } else {
        format!("from {source_language} ")
    };

    let numbered = texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Translate the following subtitle lines {source_clause}to {target_language}.\n\
         \n\
         Rules:\n\
         1. Keep translations natural and fluent\n\
         2. Preserve the original meaning and tone\n\
         3. Keep any formatting tags like {{\\an8}} or {{\\pos(x,y)}} and HTML-style tags like <i>\n\
         4. Output ONLY the translations, one per line, with the same numbering format [n]\n\
         5. Do not add any explanations\n\
         \n\
         Lines to translate:\n\
         {numbered}\n\
         \n\
         Translations:"
    )
}

/// Parse a numbered response into translations, in order of appearance.
///
/// Lines carrying the `[n]` prefix contribute their payload; non-empty lines
/// without numbering are accepted as-is (models drop the numbering often
/// enough that rejecting them would fail otherwise good batches).
pub fn parse_numbered(response: &str) -> Vec<String> {
    let mut translations = Vec::new();
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(payload) = strip_number_prefix(line) {
            translations.push(payload.to_string());
        } else if !line.starts_with('[') {
            translations.push(line.to_string());
        }
    }
    translations
}

fn strip_number_prefix(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    let digits = &rest[..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(rest[close + 1..].trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_batch_prompt_numbers_lines() {
        let prompt = batch_prompt(&texts(&["Hello", "World"]), "auto", "Chinese");
        assert!(prompt.contains("[1] Hello"));
        assert!(prompt.contains("[2] World"));
        assert!(prompt.contains("to Chinese"));
        assert!(!prompt.contains("from auto"));
    }

    #[test]
    fn test_batch_prompt_mentions_source_when_known() {
        let prompt = batch_prompt(&texts(&["Hello"]), "English", "Chinese");
        assert!(prompt.contains("from English to Chinese"));
    }

    #[test]
    fn test_parse_numbered_basic() {
        let parsed = parse_numbered("[1] 你好\n[2] 世界\n[3] 再见");
        assert_eq!(parsed, texts(&["你好", "世界", "再见"]));
    }

    #[test]
    fn test_parse_accepts_unnumbered_lines() {
        let parsed = parse_numbered("[1] 你好\n世界");
        assert_eq!(parsed, texts(&["你好", "世界"]));
    }

    #[test]
    fn test_parse_skips_blank_and_bad_numbering() {
        let parsed = parse_numbered("\n[1] 你好\n\n[x] noise\n[2] 世界\n");
        assert_eq!(parsed, texts(&["你好", "世界"]));
    }

    #[test]
    fn test_parse_reports_short_responses_as_is() {
        // Count enforcement is the caller's job.
        let parsed = parse_numbered("[1] 你好\n[2] 世界");
        assert_eq!(parsed.len(), 2);
    }
}
