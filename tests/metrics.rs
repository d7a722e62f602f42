mod support;

use std::collections::HashSet;
use std::sync::OnceLock;

use corkboard::application::queue::EventQueue;
use corkboard::application::source::BoardScope;
use corkboard::cache::detail_key;
use corkboard::domain::events::ForumEventKind;
use corkboard::domain::types::EntityClass;
use corkboard::infra::telemetry;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;

use support::{FakeBoards, FakeComments, board, event, read_side};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        telemetry::describe_metrics();
        snapshotter
    })
}

fn metric_names() -> HashSet<String> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect()
}

fn counter_with_label(name: &str, label: &str, value: &str) -> u64 {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(composite_key, _, _, _)| {
            let key = composite_key.key();
            key.name() == name
                && key
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, debug_value)| match debug_value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}

#[tokio::test]
#[serial]
async fn event_path_emits_projection_metrics() {
    snapshotter();
    let (_store, context) = read_side();
    let queue = std::sync::Arc::new(EventQueue::new(1));
    let consumer = context.consumer(queue.clone(), 8);

    let created = event(
        10,
        ForumEventKind::BoardCreated {
            board: board(1, 1, 1),
        },
    );
    assert!(queue.publish(created.clone()));
    assert!(!queue.publish(created.clone()));
    consumer.consume_all().await;

    queue.publish(created);
    consumer.consume_all().await;
    queue.publish(event(
        20,
        ForumEventKind::BoardViewed {
            board_id: 1,
            view_count: 3,
        },
    ));
    consumer.consume_all().await;

    let names = metric_names();
    for metric in [
        "corkboard_event_total",
        "corkboard_bundle_apply_ms",
        "corkboard_event_queue_len",
        "corkboard_event_dropped_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
    assert!(counter_with_label("corkboard_event_total", "outcome", "stale") >= 1);
}

#[tokio::test]
#[serial]
async fn query_path_emits_cache_metrics() {
    snapshotter();
    let (store, context) = read_side();
    store.put_raw(&detail_key(EntityClass::Board, 2), b"{".to_vec());
    let boards = FakeBoards::with(vec![board(1, 1, 1), board(2, 1, 2)]);
    let comments = FakeComments::with(Vec::new());
    let queries = context.queries(boards, comments, 10, None);

    queries
        .boards_page(BoardScope::Recent, 1, None)
        .await
        .expect("page");
    queries.board(1).await.expect("cached board");

    let names = metric_names();
    for metric in [
        "corkboard_detail_hit_total",
        "corkboard_detail_miss_total",
        "corkboard_detail_corrupt_total",
        "corkboard_query_fallback_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
    assert!(counter_with_label("corkboard_query_fallback_total", "query", "page") >= 1);
}
