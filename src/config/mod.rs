//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "corkboard";
const ENV_PREFIX: &str = "CORKBOARD";
const DEFAULT_STORE_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_MARKER_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_DETAIL_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RECENT_LIST_LIMIT: u64 = 1000;
const DEFAULT_CATEGORY_LIST_LIMIT: u64 = 1000;
const DEFAULT_COMMENT_LIST_LIMIT: u64 = 100;
const DEFAULT_RANKING_LIST_LIMIT: u64 = 100;
const DEFAULT_QUERY_DEADLINE_MS: u64 = 1500;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_CONSUMER_INTERVAL_MS: u64 = 200;
const DEFAULT_CONSUMER_BATCH_LIMIT: u64 = 256;
const DEFAULT_CONSUMER_QUEUE_LIMIT: u64 = 10_000;

/// Command-line arguments for the corkboard binary.
#[derive(Debug, Parser)]
#[command(name = "corkboard", version, about = "Forum read-side cache projector")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CORKBOARD_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Consume forum events from stdin until interrupted.
    Serve(ServeArgs),
    /// Project a JSON-lines event file and print the outcome tally.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// JSON-lines file with one event per line.
    #[arg(value_name = "EVENTS", value_hint = ValueHint::FilePath)]
    pub events: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    /// Override the log level filter.
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long = "log-json", value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub log_json: Option<bool>,

    /// Override the per-call store timeout.
    #[arg(long = "store-op-timeout-ms", value_name = "MILLIS")]
    pub store_op_timeout_ms: Option<u64>,

    /// Override the key-value store URL (`redis://...`).
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,

    /// Override idempotency marker retention.
    #[arg(long = "cache-marker-ttl-seconds", value_name = "SECONDS")]
    pub cache_marker_ttl_secs: Option<u64>,

    /// Override detail snapshot expiry; zero disables expiry.
    #[arg(long = "cache-detail-ttl-seconds", value_name = "SECONDS")]
    pub cache_detail_ttl_secs: Option<u64>,

    /// Override the per-board comment index bound.
    #[arg(long = "cache-comment-list-limit", value_name = "COUNT")]
    pub cache_comment_list_limit: Option<u64>,

    /// Override the query deadline.
    #[arg(long = "query-deadline-ms", value_name = "MILLIS")]
    pub query_deadline_ms: Option<u64>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the consumer polling cadence.
    #[arg(long = "consumer-interval-ms", value_name = "MILLIS")]
    pub consumer_interval_ms: Option<u64>,

    /// Override the number of events projected per batch.
    #[arg(long = "consumer-batch-limit", value_name = "COUNT")]
    pub consumer_batch_limit: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub database: DatabaseSettings,
    pub consumer: ConsumerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Shared store; `None` keeps the cache inside this process.
    pub url: Option<String>,
    pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub marker_ttl: Duration,
    /// `None` keeps snapshots until they are deleted or evicted.
    pub detail_ttl: Option<Duration>,
    pub recent_list_limit: NonZeroUsize,
    pub category_list_limit: NonZeroUsize,
    pub comment_list_limit: NonZeroUsize,
    pub ranking_list_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub deadline: Duration,
    pub default_page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub interval: Duration,
    pub batch_limit: NonZeroUsize,
    pub queue_limit: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Replay(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&RuntimeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    query: RawQuerySettings,
    database: RawDatabaseSettings,
    consumer: RawConsumerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ms) = overrides.store_op_timeout_ms {
            self.store.op_timeout_ms = Some(ms);
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(secs) = overrides.cache_marker_ttl_secs {
            self.cache.marker_ttl_secs = Some(secs);
        }
        if let Some(secs) = overrides.cache_detail_ttl_secs {
            self.cache.detail_ttl_secs = Some(secs);
        }
        if let Some(limit) = overrides.cache_comment_list_limit {
            self.cache.comment_list_limit = Some(limit);
        }
        if let Some(ms) = overrides.query_deadline_ms {
            self.query.deadline_ms = Some(ms);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(ms) = overrides.consumer_interval_ms {
            self.consumer.interval_ms = Some(ms);
        }
        if let Some(limit) = overrides.consumer_batch_limit {
            self.consumer.batch_limit = Some(limit);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            store,
            cache,
            query,
            database,
            consumer,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            query: build_query_settings(query)?,
            database: build_database_settings(database)?,
            consumer: build_consumer_settings(consumer)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let op_timeout = positive_millis(
        store.op_timeout_ms.unwrap_or(DEFAULT_STORE_OP_TIMEOUT_MS),
        "store.op_timeout_ms",
    )?;
    Ok(StoreSettings {
        url: non_blank(store.url),
        op_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let marker_secs = cache.marker_ttl_secs.unwrap_or(DEFAULT_MARKER_TTL_SECS);
    if marker_secs == 0 {
        return Err(LoadError::invalid(
            "cache.marker_ttl_secs",
            "must be greater than zero",
        ));
    }

    let detail_secs = cache.detail_ttl_secs.unwrap_or(DEFAULT_DETAIL_TTL_SECS);
    let detail_ttl = (detail_secs > 0).then(|| Duration::from_secs(detail_secs));

    Ok(CacheSettings {
        marker_ttl: Duration::from_secs(marker_secs),
        detail_ttl,
        recent_list_limit: non_zero_usize(
            cache.recent_list_limit.unwrap_or(DEFAULT_RECENT_LIST_LIMIT),
            "cache.recent_list_limit",
        )?,
        category_list_limit: non_zero_usize(
            cache
                .category_list_limit
                .unwrap_or(DEFAULT_CATEGORY_LIST_LIMIT),
            "cache.category_list_limit",
        )?,
        comment_list_limit: non_zero_usize(
            cache.comment_list_limit.unwrap_or(DEFAULT_COMMENT_LIST_LIMIT),
            "cache.comment_list_limit",
        )?,
        ranking_list_limit: non_zero_usize(
            cache.ranking_list_limit.unwrap_or(DEFAULT_RANKING_LIST_LIMIT),
            "cache.ranking_list_limit",
        )?,
    })
}

fn build_query_settings(query: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    let deadline = positive_millis(
        query.deadline_ms.unwrap_or(DEFAULT_QUERY_DEADLINE_MS),
        "query.deadline_ms",
    )?;
    let page_size = query.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let default_page_size = non_zero_u32(page_size.into(), "query.default_page_size")?;

    Ok(QuerySettings {
        deadline,
        default_page_size,
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;
    let acquire_timeout = positive_millis(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
    })
}

fn build_consumer_settings(consumer: RawConsumerSettings) -> Result<ConsumerSettings, LoadError> {
    let interval = positive_millis(
        consumer.interval_ms.unwrap_or(DEFAULT_CONSUMER_INTERVAL_MS),
        "consumer.interval_ms",
    )?;
    let batch_limit = non_zero_usize(
        consumer.batch_limit.unwrap_or(DEFAULT_CONSUMER_BATCH_LIMIT),
        "consumer.batch_limit",
    )?;
    let queue_limit = non_zero_usize(
        consumer.queue_limit.unwrap_or(DEFAULT_CONSUMER_QUEUE_LIMIT),
        "consumer.queue_limit",
    )?;

    Ok(ConsumerSettings {
        interval,
        batch_limit,
        queue_limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
    op_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    marker_ttl_secs: Option<u64>,
    detail_ttl_secs: Option<u64>,
    recent_list_limit: Option<u64>,
    category_list_limit: Option<u64>,
    comment_list_limit: Option<u64>,
    ranking_list_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    deadline_ms: Option<u64>,
    default_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConsumerSettings {
    interval_ms: Option<u64>,
    batch_limit: Option<u64>,
    queue_limit: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::cache::CacheConfig;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert_eq!(settings.store.op_timeout, Duration::from_millis(250));
        assert_eq!(settings.cache.marker_ttl, Duration::from_secs(86_400));
        assert_eq!(settings.cache.comment_list_limit.get(), 100);
        assert_eq!(settings.query.default_page_size.get(), 20);
        assert!(settings.database.url.is_none());
        assert_eq!(settings.consumer.queue_limit.get(), 10_000);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.cache.comment_list_limit = Some(50);

        let overrides = RuntimeOverrides {
            log_level: Some("debug".to_string()),
            cache_comment_list_limit: Some(10),
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.cache.comment_list_limit.get(), 10);
    }

    #[test]
    fn zero_detail_ttl_disables_expiry() {
        let mut raw = RawSettings::default();
        raw.cache.detail_ttl_secs = Some(0);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.cache.detail_ttl.is_none());

        let cache = CacheConfig::from(&settings);
        assert!(cache.detail_ttl().is_none());
        assert_eq!(cache.store_op_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut raw = RawSettings::default();
        raw.consumer.batch_limit = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero batch limit should be invalid");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "consumer.batch_limit",
                ..
            }
        ));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("chatty".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn blank_database_url_is_treated_as_absent() {
        let mut raw = RawSettings::default();
        raw.database.url = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn store_url_comes_from_flag_and_ignores_blanks() {
        let mut raw = RawSettings::default();
        raw.store.url = Some(" ".to_string());
        let settings = Settings::from_raw(raw.clone()).expect("valid settings");
        assert!(settings.store.url.is_none());

        raw.apply_overrides(&RuntimeOverrides {
            store_url: Some("redis://cache:6379/0".to_string()),
            ..Default::default()
        });
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.store.url.as_deref(), Some("redis://cache:6379/0"));
    }

    #[test]
    fn config_file_and_replay_flags_are_layered() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        writeln!(
            file,
            "[cache]\nranking_list_limit = 25\n\n[query]\ndeadline_ms = 900"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let cli = CliArgs::parse_from([
            "corkboard",
            "--config-file",
            path.as_str(),
            "replay",
            "--query-deadline-ms",
            "400",
            "events.jsonl",
        ]);

        let settings = load(&cli).expect("settings load");
        assert_eq!(settings.cache.ranking_list_limit.get(), 25);
        assert_eq!(settings.query.deadline, Duration::from_millis(400));
        match cli.command {
            Some(Command::Replay(args)) => assert_eq!(args.events, PathBuf::from("events.jsonl")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
