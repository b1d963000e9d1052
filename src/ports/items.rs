//! Item repository port.

use std::sync::Arc;

use async_trait::async_trait;

use crate::assessment::{Assessment, Item};
use crate::error::PortError;

/// Read-only source of items and their answer keys.
#[async_trait]
pub trait ItemRepository: Send + Sync + std::fmt::Debug {
    /// Items of an assessment, grouped by phase in presentation order.
    async fn fetch_items(&self, assessment_id: &str) -> Result<Vec<Item>, PortError>;
}

/// Serves the item bank of one loaded assessment.
#[derive(Debug, Clone)]
pub struct StaticItemRepository {
    assessment: Arc<Assessment>,
}

impl StaticItemRepository {
    /// Wraps a loaded assessment.
    #[must_use]
    pub const fn new(assessment: Arc<Assessment>) -> Self {
        Self { assessment }
    }
}

#[async_trait]
impl ItemRepository for StaticItemRepository {
    async fn fetch_items(&self, assessment_id: &str) -> Result<Vec<Item>, PortError> {
        if assessment_id != self.assessment.id() {
            return Err(PortError::NotFound(format!("assessment {assessment_id}")));
        }

        let items = self
            .assessment
            .phases()
            .iter()
            .flat_map(|phase| phase.item_ids.iter())
            .filter_map(|id| self.assessment.items().iter().find(|item| &item.id == id))
            .cloned()
            .collect();
        Ok(items)
    }
}
