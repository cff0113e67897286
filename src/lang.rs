//! Language tables shared by the skip oracle, the pipeline, and the API.
//!
//! Languages are identified by their English name ("Chinese", "Japanese", ...)
//! throughout the service. This module maps names to the ISO 639-2 codes used
//! for MKV track tags, to the short tags used in output filenames, and to the
//! alias tokens recognized inside existing filenames.

/// Supported languages as `(name, display)` pairs, in API order.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("Chinese", "Chinese (Simplified)"),
    ("English", "English"),
    ("Japanese", "Japanese"),
    ("Korean", "Korean"),
    ("French", "French"),
    ("German", "German"),
    ("Spanish", "Spanish"),
    ("Russian", "Russian"),
    ("Portuguese", "Portuguese"),
    ("Italian", "Italian"),
];

/// ISO 639-2 code used for MKV subtitle track language tags.
pub fn iso639_code(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "chinese" => "chi",
        "english" => "eng",
        "japanese" => "jpn",
        "korean" => "kor",
        "french" => "fre",
        "german" => "ger",
        "spanish" => "spa",
        "russian" => "rus",
        "portuguese" => "por",
        "italian" => "ita",
        _ => "und",
    }
}

/// Filename-friendly tag appended to translated subtitle outputs,
/// e.g. `movie.zh-Hans.srt`.
pub fn filename_tag(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "chinese" => "zh-Hans",
        "english" => "en",
        "japanese" => "ja",
        "korean" => "ko",
        "french" => "fr",
        "german" => "de",
        "spanish" => "es",
        "russian" => "ru",
        "portuguese" => "pt",
        "italian" => "it",
        _ => "und",
    }
}

/// Every tag this service may have used in an output filename.
pub fn known_tags() -> &'static [&'static str] {
    &[
        "zh-Hans", "en", "ja", "ko", "fr", "de", "es", "ru", "pt", "it", "und",
    ]
}

/// Alias tokens that mark a filename as already being in `language`.
pub fn alias_tokens(language: &str) -> Vec<String> {
    let base = language.trim().to_lowercase();
    let mut tokens: Vec<&str> = vec![];

    match base.as_str() {
        "chinese" => tokens.extend(["zh", "zh-hans", "zh-cn", "chi", "chs", "sc", "simplified", "简", "简体"]),
        "english" => tokens.extend(["en", "eng"]),
        "japanese" => tokens.extend(["ja", "jpn", "jp"]),
        "korean" => tokens.extend(["ko", "kor", "kr"]),
        "french" => tokens.extend(["fr", "fra", "fre"]),
        "german" => tokens.extend(["de", "deu", "ger"]),
        "spanish" => tokens.extend(["es", "spa"]),
        "russian" => tokens.extend(["ru", "rus"]),
        "portuguese" => tokens.extend(["pt", "por"]),
        "italian" => tokens.extend(["it", "ita"]),
        _ => {}
    }

    let mut out: Vec<String> = tokens.into_iter().map(str::to_string).collect();
    out.push(base);
    out.push(filename_tag(language).to_lowercase());
    out.sort();
    out.dedup();
    out
}

/// Whether `name` carries a marker for `target_language`.
///
/// Short tokens (<= 2 chars) only match in delimited positions such as
/// `.en.`, `_en.`, `(en)` to avoid false hits inside ordinary words.
pub fn has_language_marker(name: &str, target_language: &str) -> bool {
    let lower = name.to_lowercase();
    for token in alias_tokens(target_language) {
        if token.is_empty() {
            continue;
        }
        if token.chars().count() <= 2 {
            let delimited = [
                format!(".{token}."),
                format!("_{token}."),
                format!("-{token}."),
                format!("({token})"),
                format!("[{token}]"),
                format!(" {token}."),
                format!(".{token}-"),
                format!(".{token}_"),
            ];
            if delimited.iter().any(|p| lower.contains(p.as_str())) {
                return true;
            }
        } else if lower.contains(&token) {
            return true;
        }
    }
    false
}

/// Whether a file looks like one of our own generated outputs
/// (`*.translated.mkv`, `movie.zh-Hans.srt`, ...).
pub fn is_generated_output(name: &str) -> bool {
    let lower = name.to_lowercase();
    if lower.contains(".translated.") {
        return true;
    }
    if lower.ends_with(".srt") || lower.ends_with(".ass") {
        for tag in known_tags() {
            if lower.contains(&format!(".{}.", tag.to_lowercase())) {
                return true;
            }
        }
    }
    false
}
