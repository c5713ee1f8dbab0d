//! Fan-out of one group message to every member learning a language.

use crate::membership::MembershipIndex;
use crate::settings::SettingsStore;
use crate::translation::Translator;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Longest message prefix written to the log.
const LOG_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Map a Telegram `chat.type` value. Unknown types are treated as private.
    pub fn from_telegram(kind: &str) -> Self {
        match kind {
            "group" => ChatKind::Group,
            "supergroup" => ChatKind::Supergroup,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Private,
        }
    }

    pub fn is_multi_party(&self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }
}

/// A plain (non-command) chat message, stripped of transport details.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub text: Option<String>,
}

/// Outbound half of the chat platform.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>)
        -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotGroupChat,
    EmptyText,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::NotGroupChat => f.write_str("not in a group chat"),
            IgnoreReason::EmptyText => f.write_str("empty message"),
        }
    }
}

/// Counts for one routed message. `considered` excludes the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub considered: usize,
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Ignored(IgnoreReason),
    Routed(RouteSummary),
}

/// What happened for a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Skipped,
    Unchanged,
    Sent,
    Failed,
}

pub struct MessageRouter {
    membership: Arc<MembershipIndex>,
    settings: Arc<SettingsStore>,
    translator: Arc<dyn Translator>,
    sender: Arc<dyn ChatSender>,
    concurrency: usize,
}

impl MessageRouter {
    pub fn new(
        membership: Arc<MembershipIndex>,
        settings: Arc<SettingsStore>,
        translator: Arc<dyn Translator>,
        sender: Arc<dyn ChatSender>,
        concurrency: usize,
    ) -> Self {
        Self {
            membership,
            settings,
            translator,
            sender,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn route(&self, message: &IncomingMessage) -> RouteOutcome {
        if !message.chat_kind.is_multi_party() {
            info!("Skipping message - {}", IgnoreReason::NotGroupChat);
            return RouteOutcome::Ignored(IgnoreReason::NotGroupChat);
        }

        let text = message.text.as_deref().unwrap_or_default();
        info!(
            "Message received in '{}' from @{}: '{}'",
            message
                .chat_title
                .clone()
                .unwrap_or_else(|| format!("Chat{}", message.chat_id)),
            message
                .sender_username
                .clone()
                .unwrap_or_else(|| format!("User{}", message.sender_id)),
            preview(text)
        );

        if text.is_empty() {
            info!("Skipping {}", IgnoreReason::EmptyText);
            return RouteOutcome::Ignored(IgnoreReason::EmptyText);
        }

        self.membership.add(message.sender_id, message.chat_id).await;
        self.membership.ensure_fresh().await;

        let mut recipients: Vec<i64> = self
            .membership
            .get_members(message.chat_id)
            .await
            .into_iter()
            .filter(|&id| id != message.sender_id)
            .collect();
        recipients.sort_unstable();

        let mut summary = RouteSummary {
            considered: recipients.len(),
            ..RouteSummary::default()
        };

        let deliveries: Vec<Delivery> = stream::iter(recipients)
            .map(|user_id| self.deliver(message, text, user_id))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for delivery in deliveries {
            match delivery {
                Delivery::Skipped => {}
                Delivery::Unchanged => summary.eligible += 1,
                Delivery::Sent => {
                    summary.eligible += 1;
                    summary.sent += 1;
                }
                Delivery::Failed => {
                    summary.eligible += 1;
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Finished processing message {} - considered {} members, {} eligible, sent {} translations, {} failed",
            message.message_id, summary.considered, summary.eligible, summary.sent, summary.failed
        );
        RouteOutcome::Routed(summary)
    }

    async fn deliver(&self, message: &IncomingMessage, text: &str, user_id: i64) -> Delivery {
        let settings = self.settings.get(user_id).await;
        let Some(language) = settings.target_language() else {
            if settings.language.is_none() {
                info!("Skipping User{} - no language set", user_id);
            } else {
                info!("Skipping User{} - mode is {}", user_id, settings.mode);
            }
            return Delivery::Skipped;
        };

        info!("Processing for User{} learning {}", user_id, language);
        let translated = self.translator.translate(text, language).await;

        if translated == text || translated.trim().is_empty() {
            info!("No useful translation generated for User{}", user_id);
            return Delivery::Unchanged;
        }

        match self
            .sender
            .send_message(message.chat_id, &translated, Some(message.message_id))
            .await
        {
            Ok(()) => {
                info!("Sent {} translation to chat {}", language, message.chat_id);
                Delivery::Sent
            }
            Err(e) => {
                error!("Error sending translation for User{}: {:#}", user_id, e);
                Delivery::Failed
            }
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > LOG_PREVIEW_CHARS {
        format!("{}...", text.chars().take(LOG_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, ManualClock};
    use crate::settings::{Mode, SettingsUpdate};
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Mutex;

    // ==================== Test Doubles ====================

    /// Appends the language in brackets; returns the input unchanged for "Echo".
    struct FakeTranslator;

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(&self, text: &str, target_language: &str) -> String {
            if target_language == "Echo" {
                text.to_string()
            } else {
                format!("{} [{}]", text, target_language)
            }
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(i64, String, Option<i64>)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ChatSender for RecordingSender {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            reply_to: Option<i64>,
        ) -> anyhow::Result<()> {
            if self.fail_on.as_deref().is_some_and(|f| text.contains(f)) {
                anyhow::bail!("Telegram API error (403 Forbidden)");
            }
            self.sent
                .lock()
                .await
                .push((chat_id, text.to_string(), reply_to));
            Ok(())
        }
    }

    struct Fixture {
        settings: Arc<SettingsStore>,
        membership: Arc<MembershipIndex>,
        sender: Arc<RecordingSender>,
        router: MessageRouter,
    }

    fn fixture_with_sender(sender: RecordingSender) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::with_clock(
            Duration::from_secs(300),
            Arc::new(ManualClock::new()),
        ));
        let settings = Arc::new(SettingsStore::new(store.clone(), cache.clone()));
        let membership = Arc::new(MembershipIndex::new(store, cache));
        let sender = Arc::new(sender);
        let router = MessageRouter::new(
            membership.clone(),
            settings.clone(),
            Arc::new(FakeTranslator),
            sender.clone(),
            4,
        );
        Fixture {
            settings,
            membership,
            sender,
            router,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_sender(RecordingSender::default())
    }

    fn group_message(sender_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: -100,
            chat_kind: ChatKind::Supergroup,
            chat_title: Some("Study Group".to_string()),
            message_id: 42,
            sender_id,
            sender_username: None,
            text: Some(text.to_string()),
        }
    }

    async fn learner(f: &Fixture, user_id: i64, language: &str, mode: Mode) {
        f.settings
            .set(user_id, SettingsUpdate::Language(language.to_string()))
            .await;
        f.settings.set(user_id, SettingsUpdate::Mode(mode)).await;
        f.membership.add(user_id, -100).await;
    }

    // ==================== ChatKind Tests ====================

    #[test]
    fn test_chat_kind_from_telegram() {
        assert_eq!(ChatKind::from_telegram("group"), ChatKind::Group);
        assert_eq!(ChatKind::from_telegram("supergroup"), ChatKind::Supergroup);
        assert_eq!(ChatKind::from_telegram("channel"), ChatKind::Channel);
        assert_eq!(ChatKind::from_telegram("private"), ChatKind::Private);
        assert!(ChatKind::Group.is_multi_party());
        assert!(!ChatKind::Channel.is_multi_party());
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "a".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "a".repeat(50)));
        assert_eq!(preview("short"), "short");
    }

    // ==================== Rejection Tests ====================

    #[tokio::test]
    async fn test_private_chat_is_ignored() {
        let f = fixture();
        let mut message = group_message(1, "Hello");
        message.chat_kind = ChatKind::Private;

        let outcome = f.router.route(&message).await;
        assert_eq!(outcome, RouteOutcome::Ignored(IgnoreReason::NotGroupChat));
        assert!(f.membership.get_members(-100).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_is_ignored_without_membership() {
        let f = fixture();
        let mut message = group_message(1, "");
        assert_eq!(
            f.router.route(&message).await,
            RouteOutcome::Ignored(IgnoreReason::EmptyText)
        );

        message.text = None;
        assert_eq!(
            f.router.route(&message).await,
            RouteOutcome::Ignored(IgnoreReason::EmptyText)
        );
        assert!(f.membership.get_members(-100).await.is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_only_text_is_still_routed() {
        let f = fixture();
        learner(&f, 2, "Spanish", Mode::Overlay).await;

        let outcome = f.router.route(&group_message(1, "  ")).await;
        assert!(matches!(outcome, RouteOutcome::Routed(_)));
        assert!(f.membership.get_members(-100).await.contains(&1));
    }

    // ==================== Fan-out Tests ====================

    #[tokio::test]
    async fn test_only_eligible_member_receives_translation() {
        let f = fixture();
        // A: sender, B: Spanish overlay, C: French but off
        learner(&f, 2, "Spanish", Mode::Overlay).await;
        learner(&f, 3, "French", Mode::Off).await;

        let outcome = f.router.route(&group_message(1, "Hello")).await;

        assert_eq!(
            outcome,
            RouteOutcome::Routed(RouteSummary {
                considered: 2,
                eligible: 1,
                sent: 1,
                failed: 0,
            })
        );
        let sent = f.sender.sent.lock().await;
        assert_eq!(
            *sent,
            vec![(-100, "Hello [Spanish]".to_string(), Some(42))]
        );
    }

    #[tokio::test]
    async fn test_sender_is_recorded_as_member() {
        let f = fixture();
        f.router.route(&group_message(7, "Hi all")).await;

        assert_eq!(f.membership.get_members(-100).await, HashSet::from([7]));
    }

    #[tokio::test]
    async fn test_sender_never_receives_own_translation() {
        let f = fixture();
        learner(&f, 1, "Tamil", Mode::Overlay).await;

        let outcome = f.router.route(&group_message(1, "Hello")).await;
        assert_eq!(
            outcome,
            RouteOutcome::Routed(RouteSummary::default()),
            "Sender is excluded from considered"
        );
        assert!(f.sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_translation_is_not_sent() {
        let f = fixture();
        learner(&f, 2, "Echo", Mode::Overlay).await;

        let outcome = f.router.route(&group_message(1, "Hello")).await;
        assert_eq!(
            outcome,
            RouteOutcome::Routed(RouteSummary {
                considered: 1,
                eligible: 1,
                sent: 0,
                failed: 0,
            })
        );
        assert!(f.sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_other_members() {
        let f = fixture_with_sender(RecordingSender {
            fail_on: Some("[Telugu]".to_string()),
            ..RecordingSender::default()
        });
        learner(&f, 2, "Telugu", Mode::Overlay).await;
        learner(&f, 3, "Japanese", Mode::Overlay).await;
        learner(&f, 4, "French", Mode::Overlay).await;

        let outcome = f.router.route(&group_message(1, "Good morning")).await;
        assert_eq!(
            outcome,
            RouteOutcome::Routed(RouteSummary {
                considered: 3,
                eligible: 3,
                sent: 2,
                failed: 1,
            })
        );

        let sent: HashSet<String> = f
            .sender
            .sent
            .lock()
            .await
            .iter()
            .map(|(_, text, _)| text.clone())
            .collect();
        assert_eq!(
            sent,
            HashSet::from([
                "Good morning [Japanese]".to_string(),
                "Good morning [French]".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_members_without_language_are_skipped() {
        let f = fixture();
        f.membership.add(2, -100).await;
        f.settings.set(2, SettingsUpdate::Mode(Mode::Overlay)).await;

        let outcome = f.router.route(&group_message(1, "Hello")).await;
        assert_eq!(
            outcome,
            RouteOutcome::Routed(RouteSummary {
                considered: 1,
                ..RouteSummary::default()
            })
        );
    }
}
