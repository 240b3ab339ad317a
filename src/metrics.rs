//! Prometheus metrics for the CrossBridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

lazy_static! {
    // Block processing metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "crossbridge_blocks_processed_total",
        "Total number of blocks scanned for bridge events",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "crossbridge_latest_block",
        "Latest block number processed",
        &["chain"]
    ).unwrap();

    pub static ref EVENTS_DETECTED: CounterVec = register_counter_vec!(
        "crossbridge_events_detected_total",
        "Total number of bridge events detected",
        &["chain", "event"]
    ).unwrap();

    pub static ref RELAYS: CounterVec = register_counter_vec!(
        "crossbridge_relays_total",
        "Relay jobs finished, by direction and outcome",
        &["direction", "outcome"]
    ).unwrap();

    pub static ref ATTESTATIONS: Counter = register_counter!(
        "crossbridge_attestations_total",
        "Wrapped-token attestations created by this relayer"
    ).unwrap();

    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "crossbridge_retries_total",
        "Retried chain calls",
        &["call"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "crossbridge_relay_latency_seconds",
        "Time from dispatch to confirmed release",
        &["direction"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref IN_FLIGHT: Gauge = register_gauge!(
        "crossbridge_relays_in_flight",
        "Relay tasks currently running"
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "crossbridge_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "crossbridge_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a block processed
pub fn record_block_processed(chain: &str, block_number: u64) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_event_detected(chain: &str, event: &str) {
    EVENTS_DETECTED.with_label_values(&[chain, event]).inc();
}

/// Record a finished relay; `outcome` is "released", "skipped" or an error kind
pub fn record_relay(direction: &str, outcome: &str) {
    RELAYS.with_label_values(&[direction, outcome]).inc();
}

pub fn record_attestation() {
    ATTESTATIONS.inc();
}

pub fn record_retry(call: &str) {
    RETRIES.with_label_values(&[call]).inc();
}

/// Record processing latency
pub fn record_latency(direction: &str, seconds: f64) {
    RELAY_LATENCY.with_label_values(&[direction]).observe(seconds);
}

pub fn set_in_flight(count: usize) {
    IN_FLIGHT.set(count as f64);
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

/// Render the default registry in the text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
