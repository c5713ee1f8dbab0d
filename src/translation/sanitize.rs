//! Cleanup of raw model output into a single romanized phrase.
//!
//! Stages run in a fixed order; later stages assume the earlier ones ran.

use regex::Regex;
use std::sync::OnceLock;

const QUOTES: &[char] = &['"', '\''];

/// Labels models like to put in front of the answer.
pub const LABEL_PREFIXES: &[&str] = &[
    "Translation:",
    "Pronunciation:",
    "Transliteration:",
    "In English:",
    "Phonetic:",
    "Romanized:",
];

/// Native scripts removed from the output: Devanagari through Malayalam.
pub const NATIVE_SCRIPT_RANGES: &[(char, char)] = &[
    ('\u{0900}', '\u{097F}'), // Devanagari
    ('\u{0980}', '\u{09FF}'), // Bengali
    ('\u{0A00}', '\u{0A7F}'), // Gurmukhi
    ('\u{0A80}', '\u{0AFF}'), // Gujarati
    ('\u{0B00}', '\u{0B7F}'), // Oriya
    ('\u{0B80}', '\u{0BFF}'), // Tamil
    ('\u{0C00}', '\u{0C7F}'), // Telugu
    ('\u{0C80}', '\u{0CFF}'), // Kannada
    ('\u{0D00}', '\u{0D7F}'), // Malayalam
];

const QUOTE_EDGES_PATTERN: &str = r#"^["']*|["']*$"#;
/// Parenthesized syllable annotations, e.g. "(Bon-zhoor)"
const HYPHENATED_PARENTHETICAL_PATTERN: &str = r"\s*\([^)]*-[^)]*\)";
/// A period followed by a hyphen-joined word run, e.g. ". Oh-la"
const TRAILING_BREAKDOWN_PATTERN: &str = r"\.\s+[A-Za-z-]+(?:-[A-Za-z-]+)+";

struct Rules {
    quote_edges: Regex,
    label_prefix: Regex,
    native_script: Regex,
    hyphenated_parenthetical: Regex,
    trailing_breakdown: Regex,
}

static RULES: OnceLock<Rules> = OnceLock::new();

fn rules() -> &'static Rules {
    RULES.get_or_init(|| {
        let labels = LABEL_PREFIXES
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");
        let ranges: String = NATIVE_SCRIPT_RANGES
            .iter()
            .map(|(start, end)| format!("\\x{{{:04X}}}-\\x{{{:04X}}}", *start as u32, *end as u32))
            .collect();

        Rules {
            quote_edges: Regex::new(QUOTE_EDGES_PATTERN).expect("valid quote regex"),
            label_prefix: Regex::new(&format!("(?i)^(?:{})", labels)).expect("valid label regex"),
            native_script: Regex::new(&format!("[{}]", ranges)).expect("valid script regex"),
            hyphenated_parenthetical: Regex::new(HYPHENATED_PARENTHETICAL_PATTERN)
                .expect("valid parenthetical regex"),
            trailing_breakdown: Regex::new(TRAILING_BREAKDOWN_PATTERN)
                .expect("valid breakdown regex"),
        }
    })
}

pub fn sanitize(raw: &str) -> String {
    let rules = rules();
    let mut result = raw.trim().to_string();

    // 1. wrapping quotes
    result = rules.quote_edges.replace_all(&result, "").into_owned();

    // 2. label prefixes
    result = rules.label_prefix.replace(&result, "").trim().to_string();

    // 3. native script
    result = rules.native_script.replace_all(&result, "").into_owned();

    // 4. first line only
    if let Some((first, _)) = result.split_once('\n') {
        result = first.trim().to_string();
    }

    // 5. "(syl-la-ble)" annotations
    result = rules
        .hyphenated_parenthetical
        .replace_all(&result, "")
        .into_owned();

    // 6. ". syl-la-ble" breakdowns
    result = rules.trailing_breakdown.replace_all(&result, ".").into_owned();

    // 7. later sentences with hyphens are breakdowns of the first
    let sentences: Vec<&str> = result.split('.').collect();
    if sentences.len() > 1 && sentences[1..].iter().any(|s| s.contains('-')) {
        result = format!("{}.", sentences[0].trim());
    }

    // Truncation can expose a closing quote or whitespace
    result.trim().trim_matches(QUOTES).trim().to_string()
}
