use serde::{Deserialize, Serialize};

use nrelay::kind;

/// Feed polling and query shaping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Authors per feed query
    pub query_chunk_size: usize,
    pub poll_interval_secs: u64,
    /// Maintenance ticks between full reconnects
    pub reconnect_after_polls: u32,
    /// How far back the first feed refresh reaches
    pub initial_window_secs: u64,
    /// How far back `refresh_feed_reset` reaches
    pub reset_window_secs: u64,
    pub feed_kinds: Vec<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            query_chunk_size: 25,
            poll_interval_secs: 60,
            reconnect_after_polls: 15,
            initial_window_secs: 12 * 60 * 60,
            reset_window_secs: 6 * 60 * 60,
            feed_kinds: vec![kind::TEXT_NOTE, kind::REPOST],
        }
    }
}
