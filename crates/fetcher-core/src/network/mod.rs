//! HTTP plumbing shared by the catalog client and the downloader.

mod retry;

pub use retry::{retry_async, retry_async_with_floor, RetryConfig, RetryStats};

use crate::config::NetworkConfig;
use crate::error::Result;

/// Build the shared HTTP client.
///
/// Only the connect phase is bounded. Transfers of multi-gigabyte files and
/// slow hash lookups are left without a total timeout.
pub fn build_http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(NetworkConfig::USER_AGENT)
        .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}
