//! In-memory delivery channel

use async_trait::async_trait;
use pin_relay::{DeliveryChannel, DeliveryError, MediaItem};
use std::sync::Mutex;

/// Records every album it is asked to send
///
/// Succeeds unless a failure is set, in which case every send fails with it.
#[derive(Default)]
pub struct RecordingChannel {
    albums: Mutex<Vec<(String, Vec<MediaItem>)>>,
    failure: Mutex<Option<DeliveryError>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(error: DeliveryError) -> Self {
        let channel = Self::default();
        channel.set_failure(Some(error));
        channel
    }

    pub fn set_failure(&self, failure: Option<DeliveryError>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Albums that reached the channel, including failed ones
    pub fn albums(&self) -> Vec<(String, Vec<MediaItem>)> {
        self.albums.lock().unwrap().clone()
    }

    pub fn sent_filenames(&self) -> Vec<String> {
        self.albums()
            .into_iter()
            .flat_map(|(_, album)| album.into_iter().map(|m| m.filename))
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send_album(&self, target: &str, album: &[MediaItem]) -> Result<(), DeliveryError> {
        self.albums
            .lock()
            .unwrap()
            .push((target.to_string(), album.to_vec()));
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
