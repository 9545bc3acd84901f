//! Async chat memory service
//!
//! Entry point for the agent orchestration and session-reset paths. The
//! service owns the store explicitly; SQLite work runs on blocking threads
//! so transactions never span an `.await`.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::store::{ChatMessage, ChatStore};
use crate::{Error, Result};

/// Prefix of stored user turns
pub const USER_PREFIX: &str = "User: ";
/// Prefix of stored agent turns
pub const AGENT_PREFIX: &str = "Agent: ";

/// Keep only ASCII letters and digits of a transport conversation id.
/// Returns `None` when nothing is left.
pub fn normalize_user_id(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Conversation memory shared by request handlers
#[derive(Clone)]
pub struct ChatService {
    store: Arc<ChatStore>,
}

impl ChatService {
    /// Wrap an already opened store
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    /// Create the database directory and open the configured store
    pub async fn open(config: &Config) -> Result<Self> {
        let path = config.db_path();
        let limit = config.db.retention_limit;

        let store = tokio::task::spawn_blocking(move || -> Result<ChatStore> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            ChatStore::open_with_limit(&path, limit)
        })
        .await??;

        info!("Chat memory ready at {}", store.location());
        Ok(Self::new(Arc::new(store)))
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    async fn call_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ChatStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Stored message texts of `user_id`, most recent first
    pub async fn history(&self, user_id: &str) -> Result<Vec<String>> {
        let messages = self.messages(user_id).await?;
        Ok(messages.into_iter().map(|m| m.message).collect())
    }

    /// Full stored records of `user_id`, most recent first
    pub async fn messages(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let user_id = user_id.to_string();
        self.call_blocking(move |store| store.get_messages(&user_id))
            .await
    }

    /// Append a single message in its own transaction
    pub async fn add_message(&self, user_id: &str, message: &str) -> Result<ChatMessage> {
        let user_id = user_id.to_string();
        let message = message.to_string();
        self.call_blocking(move |store| store.transaction(|tx| tx.add_message(&user_id, &message)))
            .await
    }

    /// Store a question and its answer as one atomic write
    pub async fn record_exchange(
        &self,
        user_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(ChatMessage, ChatMessage)> {
        let user_id = user_id.to_string();
        let question = format!("{}{}", USER_PREFIX, question);
        let answer = format!("{}{}", AGENT_PREFIX, answer);

        self.call_blocking(move |store| {
            store.transaction(|tx| {
                let asked = tx.add_message(&user_id, &question)?;
                let answered = tx.add_message(&user_id, &answer)?;
                Ok::<_, Error>((asked, answered))
            })
        })
        .await
    }

    /// Answer `question` with `agent` and remember the exchange.
    ///
    /// `agent` receives the question and the stored history (most recent
    /// first). Nothing is written when it fails.
    pub async fn invoke<F, Fut>(&self, user_id: &str, question: &str, agent: F) -> Result<String>
    where
        F: FnOnce(String, Vec<String>) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let history = self.history(user_id).await?;
        debug!(
            "Invoking agent for user {} with {} history messages",
            user_id,
            history.len()
        );

        let answer = agent(question.to_string(), history).await?;
        self.record_exchange(user_id, question, &answer).await?;
        Ok(answer)
    }

    /// Forget everything stored for `user_id`; returns the number removed
    pub async fn new_session(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        let deleted = self
            .call_blocking(move |store| store.delete_all_messages(&user_id))
            .await?;
        info!("New session: cleared {} messages", deleted);
        Ok(deleted)
    }

    /// Number of stored messages for `user_id`
    pub async fn message_count(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.call_blocking(move |store| store.get_message_count(&user_id))
            .await
    }

    /// Close the store; clones of this service fail afterwards
    pub async fn shutdown(&self) -> Result<()> {
        self.call_blocking(|store| store.close()).await
    }
}

impl From<ChatStore> for ChatService {
    fn from(store: ChatStore) -> Self {
        Self::new(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ChatService {
        ChatService::from(ChatStore::in_memory().unwrap())
    }

    #[test]
    fn test_normalize_user_id() {
        assert_eq!(
            normalize_user_id("a:1-B_2@thread.v2").as_deref(),
            Some("a1B2threadv2")
        );
        assert_eq!(normalize_user_id("--::--"), None);
        assert_eq!(normalize_user_id(""), None);
    }

    #[tokio::test]
    async fn test_record_exchange_pairs_turns() {
        let service = service();

        let (asked, answered) = service
            .record_exchange("u1", "What is onboarding?", "A checklist.")
            .await
            .unwrap();

        assert_eq!(asked.message, "User: What is onboarding?");
        assert_eq!(answered.message, "Agent: A checklist.");
        assert!(answered.message_id > asked.message_id);
        assert_eq!(
            service.history("u1").await.unwrap(),
            vec!["Agent: A checklist.", "User: What is onboarding?"]
        );
    }

    #[tokio::test]
    async fn test_invoke_passes_history_and_records() {
        let service = service();
        service.record_exchange("u1", "hi", "hello").await.unwrap();

        let answer = service
            .invoke("u1", "and now?", |question, history| async move {
                assert_eq!(question, "and now?");
                assert_eq!(history, vec!["Agent: hello", "User: hi"]);
                Ok("still here".to_string())
            })
            .await
            .unwrap();

        assert_eq!(answer, "still here");
        assert_eq!(service.message_count("u1").await.unwrap(), 4);
        assert_eq!(service.history("u1").await.unwrap()[0], "Agent: still here");
    }

    #[tokio::test]
    async fn test_failed_agent_writes_nothing() {
        let service = service();
        service.record_exchange("u1", "hi", "hello").await.unwrap();

        let result = service
            .invoke("u1", "break", |_, _| async {
                Err(Error::Agent("model unavailable".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Agent(_))));
        assert_eq!(service.message_count("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_message_and_records() {
        let service = service();

        let added = service.add_message("u1", "plain note").await.unwrap();
        let records = service.messages("u1").await.unwrap();

        assert_eq!(records, vec![added]);
        assert!(matches!(
            service.add_message("", "x").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let service = service();
        for i in 0..4 {
            service
                .record_exchange("u1", &format!("q{}", i), &format!("a{}", i))
                .await
                .unwrap();
        }

        assert_eq!(
            service.history("u1").await.unwrap(),
            vec!["Agent: a3", "User: q3", "Agent: a2", "User: q2", "Agent: a1"]
        );
    }

    #[tokio::test]
    async fn test_new_session() {
        let service = service();
        service.record_exchange("u1", "hi", "hello").await.unwrap();
        service.record_exchange("u2", "hey", "yo").await.unwrap();

        assert_eq!(service.new_session("u1").await.unwrap(), 2);
        assert_eq!(service.new_session("u1").await.unwrap(), 0);
        assert!(service.history("u1").await.unwrap().is_empty());
        assert_eq!(service.message_count("u2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_users() {
        let service = service();

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let service = service.clone();
                tokio::spawn(async move {
                    let user = format!("user{}", n);
                    for i in 0..5 {
                        service
                            .record_exchange(&user, &format!("q{}", i), &format!("a{}", i))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        for n in 0..8 {
            let history = service.history(&format!("user{}", n)).await.unwrap();
            assert_eq!(history.len(), 5);
            assert_eq!(history[0], "Agent: a4");
        }
    }

    #[tokio::test]
    async fn test_open_from_config_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app.dir = dir.path().join("app").display().to_string();
        config.db.retention_limit = 3;

        let service = ChatService::open(&config).await.unwrap();
        assert!(config.db_dir().is_dir());
        assert_eq!(service.store().retention_limit(), 3);

        service.record_exchange("u1", "q", "a").await.unwrap();
        service.shutdown().await.unwrap();

        let result = service.history("u1").await;
        assert!(result.unwrap_err().is_closed());

        let reopened = ChatService::open(&config).await.unwrap();
        assert_eq!(reopened.message_count("u1").await.unwrap(), 2);
    }
}
