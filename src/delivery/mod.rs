//! Album delivery
//!
//! - [`batch`]: groups staged items into albums, retries, records success, cleans up
//! - [`telegram`]: Bot API implementation of [`DeliveryChannel`]

use crate::error::DeliveryError;
use async_trait::async_trait;

mod batch;
mod telegram;

pub use batch::{BatchDeliverer, DeliveryReport};
pub use telegram::TelegramChannel;

/// One image of an album, read from the staging directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    /// Staged file name
    pub filename: String,
    /// File contents
    pub bytes: Vec<u8>,
    /// Caption shown with this item (Markdown)
    pub caption: Option<String>,
}

/// Destination that accepts albums of images
///
/// A send is all-or-nothing: the channel either accepts the whole album or
/// reports an error for the whole album. Implementations classify failures
/// through [`DeliveryError`] so the caller can tell transient conditions
/// (timeout, rate limiting) from permanent ones.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use pin_relay::delivery::{DeliveryChannel, MediaItem};
/// use pin_relay::error::DeliveryError;
///
/// struct StdoutChannel;
///
/// #[async_trait]
/// impl DeliveryChannel for StdoutChannel {
///     async fn send_album(&self, target: &str, album: &[MediaItem]) -> Result<(), DeliveryError> {
///         for item in album {
///             println!("{target}: {} ({} bytes)", item.filename, item.bytes.len());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send `album` to `target` as a single grouped message
    async fn send_album(&self, target: &str, album: &[MediaItem]) -> Result<(), DeliveryError>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
