//! Integration test modules

mod migration_pipeline;
mod repair_scenarios;
mod sled_cache;
mod sync_roundtrip;
