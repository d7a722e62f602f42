use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "corkboard_event_total",
            Unit::Count,
            "Projected events by kind and outcome."
        );
        describe_histogram!(
            "corkboard_bundle_apply_ms",
            Unit::Milliseconds,
            "Latency of one atomic bundle, by execution strategy."
        );
        describe_counter!(
            "corkboard_detail_hit_total",
            Unit::Count,
            "Detail snapshots served from the cache."
        );
        describe_counter!(
            "corkboard_detail_miss_total",
            Unit::Count,
            "Detail snapshot lookups that missed the cache."
        );
        describe_counter!(
            "corkboard_detail_corrupt_total",
            Unit::Count,
            "Cached detail snapshots that failed to decode."
        );
        describe_counter!(
            "corkboard_query_fallback_total",
            Unit::Count,
            "List queries that consulted the system of record."
        );
        describe_gauge!(
            "corkboard_event_queue_len",
            Unit::Count,
            "Current number of events awaiting projection."
        );
        describe_counter!(
            "corkboard_event_dropped_total",
            Unit::Count,
            "Events dropped because the queue was full."
        );
    });
}
