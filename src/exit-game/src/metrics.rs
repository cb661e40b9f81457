//! Metrics for the exit game.

use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge, Opts};

lazy_static! {
    /// Counter for the number of exits started.
    pub static ref EXITS_STARTED: Counter = register_counter!(
        Opts::new(
            "plasma_exits_started_total",
            "Total number of exits started"
        )
    )
    .unwrap();

    /// Counter for the number of exits that finalized in the exitor's favour.
    pub static ref EXITS_FINALIZED: Counter = register_counter!(
        Opts::new(
            "plasma_exits_finalized_total",
            "Total number of exits finalized"
        )
    )
    .unwrap();

    /// Counter for the number of exits invalidated by a challenge.
    pub static ref EXITS_INVALIDATED: Counter = register_counter!(
        Opts::new(
            "plasma_exits_invalidated_total",
            "Total number of exits invalidated"
        )
    )
    .unwrap();

    /// Counter for the number of challenges accepted, by kind.
    pub static ref CHALLENGES: CounterVec = register_counter_vec!(
        Opts::new(
            "plasma_challenges_total",
            "Total number of challenges accepted"
        ),
        &["kind"]
    )
    .unwrap();

    /// Counter for the number of challenges answered.
    pub static ref RESPONSES: Counter = register_counter!(
        Opts::new(
            "plasma_challenge_responses_total",
            "Total number of challenges answered by a later spend"
        )
    )
    .unwrap();

    /// Gauge for the number of exits waiting to be finalized.
    pub static ref PENDING_EXITS: Gauge = register_gauge!(
        Opts::new(
            "plasma_pending_exits",
            "Number of exits in progress"
        )
    )
    .unwrap();
}

/// Renders every registered metric in the prometheus text format.
pub fn gather() -> Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
