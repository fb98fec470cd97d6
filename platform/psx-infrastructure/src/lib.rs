pub mod persistence;
pub mod rendering;
