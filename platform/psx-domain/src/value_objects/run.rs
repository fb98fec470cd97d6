use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub attempted: u64,
    pub inserted: u64,
}

impl UpsertOutcome {
    pub fn ignored(&self) -> u64 {
        self.attempted.saturating_sub(self.inserted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub unique_symbols: i64,
    pub min_current: Option<f64>,
    pub max_current: Option<f64>,
    pub total_volume: i64,
}
