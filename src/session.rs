//! Per-user session state for the command front end
//!
//! Sessions live in memory only and are keyed by the chat user id. The
//! pipeline never sees them; it is handed a validated query.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Chat user identifier
pub type UserId = i64;

/// The search a user is currently working through
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentSearch {
    /// Query passed to the pipeline
    pub query: String,
    /// Items delivered for this query across `/search` and `/continue`
    pub total_processed: usize,
}

/// State kept for one user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserSession {
    /// Whether the user has entered the bot password
    pub authenticated: bool,
    /// Active search, if any
    pub current_search: Option<CurrentSearch>,
}

/// Keyed session store (cloneable, all clones share the same map)
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<UserId, UserSession>>>,
}

impl SessionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's session
    pub async fn get(&self, user: UserId) -> Option<UserSession> {
        self.sessions.read().await.get(&user).cloned()
    }

    /// Mark `user` as authenticated, starting from a clean session
    pub async fn authenticate(&self, user: UserId) {
        self.sessions.write().await.insert(
            user,
            UserSession {
                authenticated: true,
                current_search: None,
            },
        );
    }

    /// Whether `user` has authenticated
    pub async fn is_authenticated(&self, user: UserId) -> bool {
        self.sessions
            .read()
            .await
            .get(&user)
            .is_some_and(|s| s.authenticated)
    }

    /// Replace the user's current search with a fresh one for `query`
    pub async fn begin_search(&self, user: UserId, query: impl Into<String>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(user).or_default();
        session.current_search = Some(CurrentSearch {
            query: query.into(),
            total_processed: 0,
        });
    }

    /// The user's current search, if any
    pub async fn current_search(&self, user: UserId) -> Option<CurrentSearch> {
        self.sessions
            .read()
            .await
            .get(&user)
            .and_then(|s| s.current_search.clone())
    }

    /// Add `count` delivered items to the current search, returning the new total
    ///
    /// Returns `None` when the user has no current search (e.g. it was
    /// stopped while the run was in flight).
    pub async fn record_processed(&self, user: UserId, count: usize) -> Option<usize> {
        let mut sessions = self.sessions.write().await;
        let search = sessions.get_mut(&user)?.current_search.as_mut()?;
        search.total_processed += count;
        Some(search.total_processed)
    }

    /// Drop the current search; returns whether there was one
    pub async fn clear_search(&self, user: UserId) -> bool {
        self.sessions
            .write()
            .await
            .get_mut(&user)
            .and_then(|s| s.current_search.take())
            .is_some()
    }

    /// Forget the user entirely
    pub async fn remove(&self, user: UserId) {
        self.sessions.write().await.remove(&user);
    }
}
