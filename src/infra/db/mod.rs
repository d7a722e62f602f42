//! Postgres-backed system of record.
//!
//! Only reads are issued here; the write side owns the schema.

mod boards;
mod comments;
mod util;

pub use boards::PostgresBoards;
pub use comments::PostgresComments;
pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query,
};

#[derive(Clone)]
pub struct PostgresSources {
    pool: Arc<PgPool>,
}

impl PostgresSources {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    pub fn boards(&self) -> PostgresBoards {
        PostgresBoards::new(self.pool.clone())
    }

    pub fn comments(&self) -> PostgresComments {
        PostgresComments::new(self.pool.clone())
    }
}
