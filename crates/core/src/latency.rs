//! Latency accounting for the translation fan-out
//!
//! Every `translation` message carries a latency block so clients can show
//! where time went. Components are wall-clock milliseconds measured on the
//! server; `network` is always zero (the client fills it in).

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyComponents {
    /// Time before the first provider call (parsing, snapshotting)
    pub preparation: u64,
    /// Max translation time across target languages
    pub translation: u64,
    /// This student's synthesis time
    pub tts: u64,
    /// Post-processing (sanitizing, transcoding, composing)
    pub processing: u64,
    /// Filled in client-side
    pub network: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    /// End-to-end from pipeline entry to send
    pub total: u64,
    /// Epoch ms at which the server finished composing the message
    pub server_complete_time: i64,
    pub components: LatencyComponents,
}

impl LatencyReport {
    /// Finalize a report from the pipeline start instant.
    pub fn complete(start: Instant, components: LatencyComponents) -> Self {
        Self {
            total: start.elapsed().as_millis() as u64,
            server_complete_time: chrono::Utc::now().timestamp_millis(),
            components,
        }
    }
}
