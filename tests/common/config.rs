//! Test configuration helpers

use paper_harvest::Config;
use std::path::Path;
use std::time::Duration;

/// Fast configuration writing into `output_dir`
///
/// Short timeouts and millisecond backoff keep retry scenarios quick; the rate
/// limit is high enough not to matter unless a test lowers it.
pub fn test_config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.workers = 4;
    config.pipeline.rate_limit = 100;
    config.fetch.timeout = Duration::from_secs(5);
    config.fetch.operation_timeout = Duration::from_secs(20);
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.output.output_dir = output_dir.to_path_buf();
    config
}
