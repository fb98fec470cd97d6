pub mod rendering;
pub mod snapshots;
