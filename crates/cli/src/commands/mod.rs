//! CLI subcommands.
//!
//! Each command returns its report as pretty-printed JSON.

pub mod get;
pub mod load;
pub mod purge;
pub mod warm;

pub use get::get_impl;
pub use load::load_impl;
pub use purge::purge_impl;
pub use warm::warm_impl;

use std::time::Duration;

use script_cache_client::ScriptCache;

/// Poll until no population for `urls` is in flight or `timeout` passes.
pub(crate) async fn settle(cache: &ScriptCache, urls: &[String], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !urls.iter().any(|url| cache.is_populating(url)) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
