#![allow(dead_code)]

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use corkboard::application::context::ReadSideContext;
use corkboard::application::source::{BoardScope, CommentScope, SourceError, SourceOfTruth};
use corkboard::cache::{CacheConfig, InMemoryStore};
use corkboard::domain::entities::{BoardReadModel, CommentReadModel};
use corkboard::domain::events::{ForumEvent, ForumEventKind};
use time::OffsetDateTime;

pub fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).expect("valid timestamp")
}

pub fn board(board_id: i64, category_id: i64, created_secs: i64) -> BoardReadModel {
    BoardReadModel {
        board_id,
        title: format!("board {board_id}"),
        content: "body".to_string(),
        category_id,
        writer_id: 1,
        view_count: 0,
        like_count: 0,
        comment_count: 0,
        created_at: at(created_secs),
        updated_at: at(created_secs),
        event_ts: 0,
    }
}

pub fn comment(comment_id: i64, board_id: i64, created_secs: i64) -> CommentReadModel {
    CommentReadModel {
        comment_id,
        board_id,
        parent_comment_id: None,
        content: format!("comment {comment_id}"),
        writer_id: 2,
        created_at: at(created_secs),
        event_ts: 0,
    }
}

pub fn event(ts: i64, kind: ForumEventKind) -> ForumEvent {
    ForumEvent::new(ts, kind)
}

/// A read side over a fresh in-memory store with default settings.
pub fn read_side() -> (Arc<InMemoryStore>, ReadSideContext) {
    read_side_with(CacheConfig::default())
}

pub fn read_side_with(config: CacheConfig) -> (Arc<InMemoryStore>, ReadSideContext) {
    let store = Arc::new(InMemoryStore::new());
    let context = ReadSideContext::new(store.clone(), config);
    (store, context)
}

/// Calls observed by a fake source.
#[derive(Default)]
pub struct SourceCalls {
    pub by_id: AtomicUsize,
    pub by_ids: AtomicUsize,
    pub pages: AtomicUsize,
    pub cursors: AtomicUsize,
}

impl SourceCalls {
    pub fn list_calls(&self) -> usize {
        self.pages.load(Ordering::SeqCst) + self.cursors.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.by_id.load(Ordering::SeqCst) + self.by_ids.load(Ordering::SeqCst)
    }
}

/// In-memory system of record for boards.
#[derive(Default)]
pub struct FakeBoards {
    rows: Mutex<Vec<BoardReadModel>>,
    pub calls: SourceCalls,
    failing: AtomicBool,
}

impl FakeBoards {
    pub fn with(rows: Vec<BoardReadModel>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn insert(&self, row: BoardReadModel) {
        self.rows.lock().expect("rows lock").push(row);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Persistence("connection refused".to_string()));
        }
        Ok(())
    }

    fn listing(&self, scope: BoardScope) -> Vec<i64> {
        let rows = self.rows.lock().expect("rows lock");
        let mut listed: Vec<&BoardReadModel> = rows
            .iter()
            .filter(|row| match scope {
                BoardScope::Recent => true,
                BoardScope::Category(category) => row.category_id == category,
            })
            .collect();
        listed.sort_by_key(|row| Reverse((row.created_at, row.board_id)));
        listed.into_iter().map(|row| row.board_id).collect()
    }
}

#[async_trait]
impl SourceOfTruth for FakeBoards {
    type Record = BoardReadModel;
    type Scope = BoardScope;

    async fn fetch_by_id(&self, id: i64) -> Result<Option<BoardReadModel>, SourceError> {
        self.calls.by_id.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.iter().find(|row| row.board_id == id).cloned())
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<BoardReadModel>, SourceError> {
        self.calls.by_ids.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows
            .iter()
            .filter(|row| ids.contains(&row.board_id))
            .cloned()
            .collect())
    }

    async fn fetch_ids_by_page(
        &self,
        scope: BoardScope,
        page: u32,
        size: u32,
    ) -> Result<Vec<i64>, SourceError> {
        self.calls.pages.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(page_of(self.listing(scope), page, size))
    }

    async fn fetch_ids_after(
        &self,
        scope: BoardScope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<i64>, SourceError> {
        self.calls.cursors.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(after(self.listing(scope), last_id, limit))
    }
}

/// In-memory system of record for comments.
#[derive(Default)]
pub struct FakeComments {
    rows: Mutex<Vec<CommentReadModel>>,
    pub calls: SourceCalls,
}

impl FakeComments {
    pub fn with(rows: Vec<CommentReadModel>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    fn listing(&self, scope: CommentScope) -> Vec<i64> {
        let CommentScope::Board(board_id) = scope;
        let rows = self.rows.lock().expect("rows lock");
        let mut listed: Vec<&CommentReadModel> =
            rows.iter().filter(|row| row.board_id == board_id).collect();
        listed.sort_by_key(|row| Reverse((row.created_at, row.comment_id)));
        listed.into_iter().map(|row| row.comment_id).collect()
    }
}

#[async_trait]
impl SourceOfTruth for FakeComments {
    type Record = CommentReadModel;
    type Scope = CommentScope;

    async fn fetch_by_id(&self, id: i64) -> Result<Option<CommentReadModel>, SourceError> {
        self.calls.by_id.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.iter().find(|row| row.comment_id == id).cloned())
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<CommentReadModel>, SourceError> {
        self.calls.by_ids.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows
            .iter()
            .filter(|row| ids.contains(&row.comment_id))
            .cloned()
            .collect())
    }

    async fn fetch_ids_by_page(
        &self,
        scope: CommentScope,
        page: u32,
        size: u32,
    ) -> Result<Vec<i64>, SourceError> {
        self.calls.pages.fetch_add(1, Ordering::SeqCst);
        Ok(page_of(self.listing(scope), page, size))
    }

    async fn fetch_ids_after(
        &self,
        scope: CommentScope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<i64>, SourceError> {
        self.calls.cursors.fetch_add(1, Ordering::SeqCst);
        Ok(after(self.listing(scope), last_id, limit))
    }
}

fn page_of(ids: Vec<i64>, page: u32, size: u32) -> Vec<i64> {
    let start = (page.max(1) - 1) as usize * size as usize;
    ids.into_iter().skip(start).take(size as usize).collect()
}

fn after(ids: Vec<i64>, last_id: Option<i64>, limit: u32) -> Vec<i64> {
    let start = match last_id {
        None => 0,
        Some(last) => match ids.iter().position(|id| *id == last) {
            Some(position) => position + 1,
            None => return Vec::new(),
        },
    };
    ids.into_iter().skip(start).take(limit as usize).collect()
}
