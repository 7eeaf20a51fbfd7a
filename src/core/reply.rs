//! Reply-generation collaborator contract.
//!
//! The orchestrator treats reply generation as an arbitrary-latency black
//! box. The built-in generator is a deterministic keyword responder; a real
//! deployment swaps in a model-backed implementation behind the same trait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during reply generation.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The generation backend failed
    #[error("Reply generation failed: {0}")]
    Backend(String),
}

/// Result type for reply generation.
pub type ReplyResult<T> = Result<T, ReplyError>;

/// Black-box reply-generation contract.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> ReplyResult<String>;
}

/// Keyword-matched canned responder.
///
/// Matches the lowercased utterance against substring rules in order and
/// falls through to a generic clarification prompt. A small artificial
/// latency approximates a remote backend; tests construct it with zero.
pub struct RuleReplyGenerator {
    latency: Duration,
}

impl Default for RuleReplyGenerator {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(500),
        }
    }
}

impl RuleReplyGenerator {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    fn respond(text: &str) -> String {
        let lowered = text.to_lowercase();

        let rules: &[(&[&str], &str)] = &[
            (
                &["cześć", "witaj", "hej"],
                "Cześć! Jak mogę Ci dzisiaj pomóc?",
            ),
            (
                &["jak się masz"],
                "Dziękuję, mam się dobrze! Jestem tutaj, aby Ci pomóc.",
            ),
            (
                &["dziękuję", "dzięki"],
                "Nie ma za co! Czy mogę jeszcze w czymś pomóc?",
            ),
            (
                &["do widzenia", "żegnaj"],
                "Do widzenia! Miło było porozmawiać. Wróć, gdy będziesz potrzebować pomocy!",
            ),
            (
                &["pogoda"],
                "Niestety nie mam dostępu do aktualnych danych pogodowych. Czy mogę pomóc Ci w czymś innym?",
            ),
        ];

        for (keywords, reply) in rules {
            if keywords.iter().any(|k| lowered.contains(k)) {
                return (*reply).to_string();
            }
        }

        format!(
            "Rozumiem, że pytasz o \"{text}\". Niestety, nie mam wystarczających informacji, \
             aby udzielić szczegółowej odpowiedzi. Czy możesz podać więcej szczegółów?"
        )
    }
}

#[async_trait]
impl ReplyGenerator for RuleReplyGenerator {
    async fn generate(&self, text: &str) -> ReplyResult<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(Self::respond(text))
    }
}
