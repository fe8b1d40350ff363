//! # Redis connection
//!
//! Shared multiplexed connection for every single-command or pipelined store call.
//!
//! ## Requirements
//!
//! - Fail fast on an unreachable server so request timeouts stay meaningful
//! - One reconnect attempt before surfacing the error
//! - Atomic units never use this connection: `WATCH` state is per connection, so each unit opens its own
use std::time::Duration;

use redis::{
    Client, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

pub async fn init_redis(client: &Client) -> RedisResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let connection_manager = client.get_connection_manager_with_config(config).await?;
    info!("Connected to Redis");

    Ok(connection_manager)
}
