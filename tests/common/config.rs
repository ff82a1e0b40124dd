//! Test configuration helpers

use pin_relay::Config;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Password accepted by the command handler in tests
pub const TEST_PASSWORD: &str = "open sesame";

/// Config pointing every external endpoint at `server` and every path into `temp_dir`
///
/// Delays are shrunk so retries and pacing do not slow the suite down.
pub fn test_config(server: &MockServer, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.search.endpoint = format!("{}{}", server.uri(), super::fixtures::SEARCH_PATH);
    config.download.output_dir = temp_dir.path().join("images");
    config.persistence.database_path = temp_dir.path().join("state.db");
    config.delivery.chat_target = "@pins".to_string();
    config.delivery.inter_batch_delay = Duration::ZERO;
    config.retry.initial_delay = Duration::from_millis(10);
    config.bot.password = Some(TEST_PASSWORD.to_string());
    config
}
