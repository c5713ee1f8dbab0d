//! Bot commands and per-update dispatch.

use crate::router::{ChatSender, MessageRouter};
use crate::settings::{Mode, SettingsStore, SettingsUpdate};
use crate::strings;
use crate::telegram::Update;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// Free-text language, arguments joined by single spaces
    SetLanguage(Option<String>),
    /// First argument only
    SetMode(Option<String>),
    GetSettings,
    Unknown(String),
}

impl Command {
    /// Parse a `/command@botname args` message. Returns `None` for plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_start();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let name = head[1..].split('@').next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();

        Some(match name.as_str() {
            "start" => Command::Start,
            "setlanguage" => {
                Command::SetLanguage((!args.is_empty()).then(|| args.join(" ")))
            }
            "setmode" => Command::SetMode(args.first().map(|a| a.to_string())),
            "getsettings" => Command::GetSettings,
            _ => Command::Unknown(name),
        })
    }
}

/// Routes each update to a command handler or the message router.
pub struct Dispatcher {
    sender: Arc<dyn ChatSender>,
    settings: Arc<SettingsStore>,
    router: Arc<MessageRouter>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn ChatSender>,
        settings: Arc<SettingsStore>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            sender,
            settings,
            router,
        }
    }

    /// Handle one update, logging instead of propagating any error so the
    /// next update is still processed.
    pub async fn dispatch(&self, update: Update) {
        let update_id = update.update_id;
        if let Err(e) = self.handle_update(update).await {
            error!("Update {} caused error: {:#}", update_id, e);
        }
    }

    pub async fn handle_update(&self, update: Update) -> Result<()> {
        // Not a message update
        let Some(message) = update.message else {
            return Ok(());
        };

        let command = message.text.as_deref().and_then(Command::parse);
        let Some(command) = command else {
            match message.to_incoming() {
                Some(incoming) => {
                    self.router.route(&incoming).await;
                }
                None => info!("Skipping message {} without sender", message.message_id),
            }
            return Ok(());
        };

        let Some(user) = message.from.as_ref() else {
            return Ok(());
        };
        let chat_id = message.chat.id;

        let reply = match command {
            Command::Start => strings::WELCOME.to_string(),
            Command::SetLanguage(None) => strings::SET_LANGUAGE_USAGE.to_string(),
            Command::SetLanguage(Some(language)) => {
                self.settings
                    .set(user.id, SettingsUpdate::Language(language.clone()))
                    .await;
                strings::language_confirmed(&language)
            }
            Command::SetMode(None) => strings::SET_MODE_USAGE.to_string(),
            Command::SetMode(Some(arg)) => match arg.parse::<Mode>() {
                Ok(mode) => {
                    self.settings.set(user.id, SettingsUpdate::Mode(mode)).await;
                    strings::mode_confirmed(mode).to_string()
                }
                Err(_) => strings::invalid_mode(),
            },
            Command::GetSettings => strings::current_settings(&self.settings.get(user.id).await),
            Command::Unknown(name) => {
                info!("Ignoring unknown command /{}", name);
                return Ok(());
            }
        };

        self.sender.send_message(chat_id, &reply, None).await
    }
}
