//! # pin-relay
//!
//! Image search-to-channel relay: finds images for a query on a search API,
//! downloads the ones never seen before, and posts them as albums to a chat
//! channel, remembering everything it handled in a local SQLite file.
//!
//! ## Flow
//!
//! query → [`search::Fetcher`] → candidate URLs → [`download::Downloader`]
//! (dedup against [`Database`], stage bytes, record `pending`) →
//! [`delivery::BatchDeliverer`] (albums, bounded retry, mark `sent`, delete
//! staged files) → [`RunReport`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use pin_relay::{Config, Pipeline, TelegramChannel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.bot.token = Some("123:abc".to_string());
//!     config.delivery.chat_target = "@my_channel".to_string();
//!
//!     let channel = Arc::new(TelegramChannel::new(&config.bot)?);
//!     let pipeline = Pipeline::new(config, channel).await?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = pipeline.run("cats", "./images".as_ref()).await;
//!     println!("downloaded {}, sent {}", report.downloaded, report.sent);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Chat command front end
pub mod commands;
/// Configuration types
pub mod config;
/// State store
pub mod db;
/// Album delivery
pub mod delivery;
/// Image downloading
pub mod download;
/// Error types
pub mod error;
/// Search-to-delivery orchestration
pub mod pipeline;
/// Bounded retry
pub mod retry;
/// Search API client and URL extraction
pub mod search;
/// Per-user sessions
pub mod session;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use commands::{Command, CommandHandler};
pub use config::{CaptionPlacement, Config};
pub use db::Database;
pub use delivery::{BatchDeliverer, DeliveryChannel, MediaItem, TelegramChannel};
pub use download::Downloader;
pub use error::{DatabaseError, DeliveryError, Error, Result};
pub use pipeline::Pipeline;
pub use search::{Fetcher, SearchConfig};
pub use session::SessionStore;
pub use types::{Event, ItemRef, ItemStatus, RunReport};
