use thiserror::Error;

use super::types::EntityClass;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: EntityClass, id: i64 },
}

impl DomainError {
    pub fn not_found(entity: EntityClass, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}
