pub mod postgres_snapshots;
