//! Bot reply texts.

use crate::settings::{Mode, UserSettings, VALID_MODES};

pub const WELCOME: &str = "Hello! I am Message Translate, your language learning assistant.\n\n\
Use /setlanguage [language] to set your learning language.\n\
Use /setmode [overlay|off] to set how you want to see translations.\n  \
- overlay: see translations in the chat\n  \
- off: disable translations (default)\n\n\
Use /getsettings to view your current settings.\n\n\
⚠️ Important: Make sure the bot is an ADMIN in your group and disable privacy mode with BotFather for full functionality.";

pub const SET_LANGUAGE_USAGE: &str = "Please specify a language, e.g., /setlanguage Spanish";

pub const SET_MODE_USAGE: &str = "Please specify a mode: /setmode [overlay|off]";

pub const MODE_OVERLAY_CONFIRMED: &str =
    "Your translation mode has been set to overlay. You will see translations in chat.";

pub const MODE_OFF_CONFIRMED: &str =
    "Your translation mode has been set to off. You will not see any translations.";

pub const LANGUAGE_NOT_SET: &str = "Not set";

pub fn language_confirmed(language: &str) -> String {
    format!("Your learning language has been set to {}.", language)
}

pub fn invalid_mode() -> String {
    format!("Invalid mode. Please choose from: {}", VALID_MODES.join(", "))
}

pub fn mode_confirmed(mode: Mode) -> &'static str {
    match mode {
        Mode::Overlay => MODE_OVERLAY_CONFIRMED,
        Mode::Off => MODE_OFF_CONFIRMED,
    }
}

pub fn current_settings(settings: &UserSettings) -> String {
    format!(
        "Your current settings:\nLearning language: {}\nTranslation mode: {}",
        settings.language.as_deref().unwrap_or(LANGUAGE_NOT_SET),
        settings.mode.description()
    )
}
