//! Metrics update functions for the Prometheus exporter.

use super::system::get_process_memory_usage;
use super::{SESSIONS_IN_USE, TOTAL_MEMORY};
use crate::pool;

/// Updates gauges that reflect current state (as opposed to the counters,
/// which the dispatcher and engine adapter update as events happen) right
/// before they are scraped.
pub fn update_metrics() {
    TOTAL_MEMORY.set(get_process_memory_usage() as f64);
    let in_use = pool::get()
        .slots()
        .iter()
        .filter(|slot| !slot.is_available())
        .count();
    SESSIONS_IN_USE.set(in_use as f64);
}
