//! JSON-lines intake of forum events.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::domain::events::ForumEvent;

use super::error::InfraError;

/// Decodes one event per line; blank lines are skipped.
pub struct EventReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R> EventReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Line number of the last event returned.
    pub fn line(&self) -> usize {
        self.line
    }

    pub async fn next_event(&mut self) -> Result<Option<ForumEvent>, InfraError> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event = serde_json::from_str(trimmed)
                .map_err(|err| InfraError::event(self.line, err.to_string()))?;
            return Ok(Some(event));
        }
        Ok(None)
    }
}
