//! Redis adapters for the Chainlens workers.
//!
//! - [`RedisCache`] - [`KeyValueCache`](chainlens_core::ports::KeyValueCache)
//!   over a reconnecting connection manager
//! - [`RedisQueue`] - [`MessageQueue`](chainlens_core::ports::MessageQueue)
//!   built on Redis lists with a processing list per queue, so an unsettled
//!   message is never lost when a worker dies mid-flight
//!
//! # Usage
//!
//! ```ignore
//! let client = chainlens_redis::open(&redis_url)?;
//! let cache = RedisCache::connect(&client).await?;
//! let queue = RedisQueue::connect(client).await?;
//! ```

mod cache;
mod queue;

pub use cache::RedisCache;
pub use queue::{QUEUE_REGISTRY_KEY, RedisQueue};

use redis::aio::ConnectionManager;

/// Open a client for `url` without connecting yet.
pub fn open(url: &str) -> redis::RedisResult<redis::Client> {
    redis::Client::open(url)
}

/// Round-trip a `PING` on an existing connection.
pub(crate) async fn ping(conn: &mut ConnectionManager) -> redis::RedisResult<()> {
    let _: String = redis::cmd("PING").query_async(conn).await?;
    Ok(())
}
