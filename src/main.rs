use std::{process, sync::Arc};

use corkboard::{
    application::{
        consumer::{ConsumeReport, EventConsumer},
        context::ReadSideContext,
        error::ErrorReport,
        queue::EventQueue,
        source::BoardScope,
    },
    cache::{CacheConfig, InMemoryStore, KeyValueStore, RedisStore},
    config,
    infra::{db::PostgresSources, error::InfraError, events::EventReader, telemetry},
};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Replay(args) => run_replay(settings, args).await,
    }
}

async fn build_context(settings: &config::Settings) -> Result<ReadSideContext, InfraError> {
    let store: Arc<dyn KeyValueStore> = match settings.store.url.as_deref() {
        Some(url) => {
            info!("Connecting to shared key-value store");
            let store = RedisStore::connect(url)
                .await
                .map_err(|err| InfraError::store(err.to_string()))?;
            Arc::new(store)
        }
        None => {
            warn!("No store.url configured; cache state stays local to this process");
            Arc::new(InMemoryStore::new())
        }
    };
    Ok(ReadSideContext::new(store, CacheConfig::from(settings)))
}

async fn run_replay(settings: config::Settings, args: config::ReplayArgs) -> Result<(), InfraError> {
    let context = build_context(&settings).await?;
    let queue = Arc::new(EventQueue::new(settings.consumer.queue_limit.get()));
    let consumer = context.consumer(queue.clone(), settings.consumer.batch_limit.get());

    let file = tokio::fs::File::open(&args.events).await?;
    let report = replay(BufReader::new(file), &queue, &consumer).await?;
    info!(
        path = %args.events.display(),
        events = report.total(),
        "Replay finished"
    );

    let json = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}

/// Feed every event of `reader` through the consumer, flushing whenever the
/// queue fills up.
async fn replay<R>(
    reader: R,
    queue: &EventQueue,
    consumer: &EventConsumer,
) -> Result<ConsumeReport, InfraError>
where
    R: AsyncBufRead + Unpin,
{
    let mut events = EventReader::new(reader);
    let mut report = ConsumeReport::default();

    while let Some(event) = events.next_event().await? {
        if queue.len() >= queue.capacity() {
            report.merge(consumer.consume_all().await);
        }
        queue.publish(event);
    }

    report.merge(consumer.consume_all().await);
    Ok(report)
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let context = build_context(&settings).await?;
    let queue = Arc::new(EventQueue::new(settings.consumer.queue_limit.get()));
    let consumer = context.consumer(queue.clone(), settings.consumer.batch_limit.get());

    if let Some(url) = settings.database.url.as_deref() {
        warm_recent_boards(&context, &settings, url).await?;
    }

    let intake = tokio::spawn(intake_stdin(queue));
    let shutdown = async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            result = intake => match result {
                Ok(Ok(lines)) => info!(lines, "Event input closed"),
                Ok(Err(err)) => error!(error = %err, "Event intake failed"),
                Err(err) => error!(error = %err, "Event intake task aborted"),
            },
        }
    };

    info!(
        interval_ms = settings.consumer.interval.as_millis() as u64,
        batch_limit = settings.consumer.batch_limit.get(),
        "Event consumer started"
    );
    let report = consumer.run(settings.consumer.interval, shutdown).await;
    info!(
        applied = report.applied,
        stale = report.stale,
        uncached = report.uncached,
        failed = report.failed,
        "Event consumer drained"
    );
    Ok(())
}

async fn intake_stdin(queue: Arc<EventQueue>) -> Result<usize, InfraError> {
    let mut events = EventReader::new(BufReader::new(tokio::io::stdin()));
    loop {
        match events.next_event().await {
            Ok(Some(event)) => {
                queue.publish(event);
            }
            Ok(None) => return Ok(events.line()),
            Err(InfraError::Event { line, message }) => {
                warn!(line, error = %message, "Skipping malformed event");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Populate the first page of recent boards from the database.
async fn warm_recent_boards(
    context: &ReadSideContext,
    settings: &config::Settings,
    url: &str,
) -> Result<(), InfraError> {
    let pool = PostgresSources::connect(
        url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| InfraError::database(err.to_string()))?;
    let sources = PostgresSources::new(pool);

    let queries = context.queries(
        Arc::new(sources.boards()),
        Arc::new(sources.comments()),
        settings.query.default_page_size.get(),
        Some(settings.query.deadline),
    );

    match queries.boards_page(BoardScope::Recent, 1, None).await {
        Ok(page) => info!(boards = page.items.len(), total = page.total, "Recent boards warmed"),
        Err(err) => {
            let details = ErrorReport::from_error("main::warm", &err);
            warn!(error = %details.joined(), "Warm-up of recent boards failed");
        }
    }
    Ok(())
}
