//! Prompt text and request parameters for phonetic transliteration.
//!
//! Everything here is static data; the request flow in the parent module
//! does not depend on the wording.

use std::sync::OnceLock;

/// Single candidate per request
pub const CANDIDATES: u32 = 1;
/// Low temperature keeps the transliteration close to deterministic
pub const TEMPERATURE: f32 = 0.1;
pub const MAX_TOKENS: u32 = 150;

/// One worked "native word → romanized pronunciation" example.
pub struct FewShotExample {
    pub language: &'static str,
    pub phrase: &'static str,
    pub translation: &'static str,
    pub native_script: Option<&'static str>,
    pub transliteration: &'static str,
}

pub const EXAMPLES: &[FewShotExample] = &[
    FewShotExample {
        language: "Tamil",
        phrase: "Hello",
        translation: "Vanakkam",
        native_script: Some("வணக்கம்"),
        transliteration: "Vanakkam",
    },
    FewShotExample {
        language: "Tamil",
        phrase: "Thank you",
        translation: "Nandri",
        native_script: Some("நன்றி"),
        transliteration: "Nandri",
    },
    FewShotExample {
        language: "Tamil",
        phrase: "Okay",
        translation: "Sari",
        native_script: Some("சரி"),
        transliteration: "Sari",
    },
    FewShotExample {
        language: "Telugu",
        phrase: "Hello",
        translation: "Namaskaram",
        native_script: Some("నమస్కారం"),
        transliteration: "Namaskaram",
    },
    FewShotExample {
        language: "Telugu",
        phrase: "Water",
        translation: "Neellu",
        native_script: Some("నీళ్ళు"),
        transliteration: "Neellu",
    },
    FewShotExample {
        language: "Spanish",
        phrase: "Good morning",
        translation: "Buenos días",
        native_script: None,
        transliteration: "Bway-nos dee-ahs",
    },
    FewShotExample {
        language: "Spanish",
        phrase: "Thank you",
        translation: "Gracias",
        native_script: None,
        transliteration: "Grah-see-us",
    },
    FewShotExample {
        language: "French",
        phrase: "Hello",
        translation: "Bonjour",
        native_script: None,
        transliteration: "Bon-zhoor",
    },
    FewShotExample {
        language: "French",
        phrase: "Goodbye",
        translation: "Au revoir",
        native_script: None,
        transliteration: "Oh ruh-vwahr",
    },
    FewShotExample {
        language: "Japanese",
        phrase: "Thank you",
        translation: "Arigatou",
        native_script: Some("ありがとう"),
        transliteration: "Ah-ree-gah-toh",
    },
];

const ROLE: &str = "You are an expert linguistic assistant specializing in **phonetic transliteration** of translations.\n\
Your task is to FIRST translate the given English text into the specified target language, \
and THEN output ONLY the Romanized (English letter) phonetic transliteration of THAT TRANSLATION, \
optimized for pronunciation by a native English speaker.";

const CRITICAL_INSTRUCTIONS: &[&str] = &[
    "NEVER output both original response AND broken down pronunciation",
    "NEVER output syllable-by-syllable breakdowns with hyphens",
    "NEVER provide explanations or translations in your output",
    "ALWAYS provide ONLY the Romanized transliteration in plain text",
    "For languages that use non-Latin scripts, provide ONLY the Romanized version",
    "Do NOT return multiple lines or versions",
];

const FORMAT_RULES: &[&str] = &[
    "ONLY the English phonetic transliteration",
    "NO introductions, translations, explanations, or native script",
    "NO syllable breakdowns unless they are natural in the target language",
    "DO NOT include any text like 'Translation:' or 'Romanized:'",
];

static SYSTEM_PROMPT: OnceLock<String> = OnceLock::new();

/// The fixed system prompt, assembled once from the tables above.
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT.get_or_init(build_system_prompt)
}

fn build_system_prompt() -> String {
    let mut prompt = String::from(ROLE);
    prompt.push_str("\n\nFollow these examples STRICTLY:\n");

    for (i, example) in EXAMPLES.iter().enumerate() {
        let native = example
            .native_script
            .map(|script| format!(" ({})", script))
            .unwrap_or_default();
        prompt.push_str(&format!(
            "Example {n} ({lang}):\n\
             User asks for: '{phrase}' in {lang}\n\
             Your thought process: '{phrase}' in {lang} is '{translation}'{native}. \
             Phonetic transliteration is '{out}'.\n\
             Your response: {out}\n\n",
            n = i + 1,
            lang = example.language,
            phrase = example.phrase,
            translation = example.translation,
            native = native,
            out = example.transliteration,
        ));
    }

    prompt.push_str("CRITICAL INSTRUCTIONS:\n");
    for (i, rule) in CRITICAL_INSTRUCTIONS.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
    }

    prompt.push_str("\nFormat your response STRICTLY as follows:\n");
    let rules: Vec<String> = FORMAT_RULES.iter().map(|r| format!("- {}", r)).collect();
    prompt.push_str(&rules.join("\n"));

    prompt
}

pub fn user_prompt(text: &str, target_language: &str) -> String {
    format!(
        "Translate the following English text into {} and provide ONLY the phonetic transliteration following the strict format rules in my instructions:\n\"{}\"",
        target_language, text
    )
}
