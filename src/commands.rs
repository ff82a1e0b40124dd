//! Chat command front end
//!
//! Turns incoming chat messages into pipeline runs and reply texts. Users
//! unlock the bot by sending the configured password; after that `/search`
//! starts a query, `/continue` runs it again for the next batch of new
//! images and `/stop` forgets it.

use crate::pipeline::Pipeline;
use crate::session::{SessionStore, UserId};
use std::path::PathBuf;
use std::sync::Arc;

const NOT_AUTHENTICATED: &str = "Please authenticate first by entering the password.";

/// A parsed chat message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/start`
    Start,
    /// `/search <query words>` (words joined by single spaces, may be empty)
    Search(String),
    /// `/continue`
    Continue,
    /// `/stop`
    Stop,
    /// Any other slash command
    Unknown(String),
    /// Plain text, treated as a password attempt
    Text(String),
}

impl Command {
    /// Parse a message; `/cmd@botname` addressing is accepted
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Command::Text(text.to_string());
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let name = name.split('@').next().unwrap_or_default();
        let args = words.collect::<Vec<_>>().join(" ");

        match name {
            "start" => Command::Start,
            "search" => Command::Search(args),
            "continue" => Command::Continue,
            "stop" => Command::Stop,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Dispatches chat messages for all users
pub struct CommandHandler {
    pipeline: Arc<Pipeline>,
    sessions: SessionStore,
    password: Option<String>,
    output_dir: PathBuf,
}

impl CommandHandler {
    /// Handler using the pipeline's bot and download settings
    pub fn new(pipeline: Arc<Pipeline>, sessions: SessionStore) -> Self {
        let password = pipeline.config().bot.password.clone();
        let output_dir = pipeline.config().download.output_dir.clone();
        Self {
            pipeline,
            sessions,
            password,
            output_dir,
        }
    }

    /// Session store backing this handler
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one message from `user`, returning the replies in order
    pub async fn handle(&self, user: UserId, text: &str) -> Vec<String> {
        match Command::parse(text) {
            Command::Start => {
                vec!["Welcome! Please enter the bot password to activate.".to_string()]
            }
            Command::Text(attempt) => vec![self.verify_password(user, &attempt).await],
            command => {
                if !self.sessions.is_authenticated(user).await {
                    return vec![NOT_AUTHENTICATED.to_string()];
                }
                match command {
                    Command::Search(query) => self.search(user, query).await,
                    Command::Continue => self.continue_search(user).await,
                    Command::Stop => {
                        self.sessions.clear_search(user).await;
                        vec!["Search stopped. You can start a new search.".to_string()]
                    }
                    _ => vec!["Unknown command. Use /search <query> to find images.".to_string()],
                }
            }
        }
    }

    async fn verify_password(&self, user: UserId, attempt: &str) -> String {
        match &self.password {
            Some(password) if password == attempt => {
                self.sessions.authenticate(user).await;
                tracing::info!(user, "User authenticated");
                "Password correct! You can now use the bot. Use /search <query> to find images."
                    .to_string()
            }
            _ => {
                tracing::debug!(user, "Rejected password attempt");
                "Incorrect password. Access denied.".to_string()
            }
        }
    }

    async fn search(&self, user: UserId, query: String) -> Vec<String> {
        if query.is_empty() {
            return vec!["Please provide a search query. Usage: /search <query>".to_string()];
        }

        self.sessions.begin_search(user, query.clone()).await;
        self.run(user, query).await
    }

    async fn continue_search(&self, user: UserId) -> Vec<String> {
        match self.sessions.current_search(user).await {
            Some(search) => self.run(user, search.query).await,
            None => vec!["No active search. Use /search <query> to start one.".to_string()],
        }
    }

    async fn run(&self, user: UserId, query: String) -> Vec<String> {
        let mut replies = vec![format!("Starting image search for: {query}")];

        let report = self.pipeline.run(&query, &self.output_dir).await;
        if report.downloaded + report.recovered == 0 {
            replies.push(format!("No images found for query: {query}"));
            return replies;
        }

        let total = self
            .sessions
            .record_processed(user, report.sent)
            .await
            .unwrap_or(report.sent);
        replies.push(format!("Images sent! Total images processed: {total}"));
        replies
    }
}
