mod support;

use std::sync::Arc;
use std::time::Duration;

use corkboard::application::consumer::ConsumeReport;
use corkboard::application::queue::EventQueue;
use corkboard::cache::{CounterKey, IndexKey};
use corkboard::domain::events::ForumEventKind;
use corkboard::infra::events::EventReader;
use tokio::io::BufReader;

use support::{board, comment, event, read_side};

#[tokio::test]
async fn consume_all_tallies_every_outcome() {
    let (store, context) = read_side();
    let queue = Arc::new(EventQueue::new(16));
    let consumer = context.consumer(queue.clone(), 2);

    let created = event(
        10,
        ForumEventKind::BoardCreated {
            board: board(1, 1, 1),
        },
    );
    queue.publish(created.clone());
    queue.publish(created);
    queue.publish(event(
        5,
        ForumEventKind::BoardViewed {
            board_id: 2,
            view_count: 1,
        },
    ));
    queue.publish(event(
        11,
        ForumEventKind::CommentCreated {
            comment: comment(7, 1, 2),
        },
    ));

    let report = consumer.consume_all().await;
    assert_eq!(
        report,
        ConsumeReport {
            applied: 2,
            stale: 1,
            uncached: 1,
            failed: 0,
        }
    );
    assert!(queue.is_empty());

    store.set_available(false);
    queue.publish(event(
        12,
        ForumEventKind::CommentDeleted {
            comment_id: 7,
            board_id: 1,
        },
    ));
    let report = consumer.consume_all().await;
    assert_eq!(report.failed, 1);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_flushes_pending_events_on_shutdown() {
    let (_store, context) = read_side();
    let queue = Arc::new(EventQueue::new(16));
    let consumer = context.consumer(queue.clone(), 1);

    for id in 1..=3 {
        queue.publish(event(
            id,
            ForumEventKind::BoardCreated {
                board: board(id, 1, id),
            },
        ));
    }

    let report = consumer
        .run(
            Duration::from_millis(100),
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await;

    assert_eq!(report.applied, 3);
    assert!(queue.is_empty());
    assert_eq!(
        context
            .counters()
            .get(CounterKey::TotalBoards)
            .await
            .expect("counter"),
        3
    );
}

#[tokio::test]
async fn json_lines_are_projected_in_order() {
    let (_store, context) = read_side();
    let queue = Arc::new(EventQueue::new(16));
    let consumer = context.consumer(queue.clone(), 16);

    let input = r#"
{"event_id":"6f9c3f7e-2a51-4d4e-9a57-0c1f1b8e0001","event_ts":100,"type":"board_created","board":{"board_id":1,"title":"hello","content":"body","category_id":3,"writer_id":9,"view_count":0,"like_count":0,"comment_count":0,"created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-01T10:00:00Z"}}
{"event_id":"6f9c3f7e-2a51-4d4e-9a57-0c1f1b8e0002","event_ts":120,"type":"comment_created","comment":{"comment_id":40,"board_id":1,"parent_comment_id":null,"content":"first","writer_id":4,"created_at":"2024-05-01T10:05:00Z"}}
{"event_id":"6f9c3f7e-2a51-4d4e-9a57-0c1f1b8e0003","event_ts":130,"type":"ranking_refreshed","metric":"likes","period":"daily","entries":[{"board_id":1,"score":12.0}]}
"#;
    let mut reader = EventReader::new(BufReader::new(input.as_bytes()));
    while let Some(event) = reader.next_event().await.expect("valid line") {
        assert!(queue.publish(event));
    }

    let report = consumer.consume_all().await;
    assert_eq!(report.applied, 3);

    let comments = context
        .index()
        .read_by_offset(IndexKey::BoardComments(1), 1, 10)
        .await
        .expect("index");
    assert_eq!(comments.ids, vec![40]);
    let board = context
        .board_details()
        .get(1)
        .await
        .expect("read")
        .expect("cached");
    assert_eq!(board.category_id, 3);
    assert_eq!(board.event_ts, 100);
}
