use serde::Serialize;

use crate::services::summary::LevelPlan;

/// A level summary assembled from its chunk summaries.
#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub original_pages: usize,
    pub language: String,
    pub level: LevelPlan,
    pub chunks: usize,
    pub summary: String,
}
