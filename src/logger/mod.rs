//! Activity logging: append-only JSONL with graceful degradation, fed by a
//! dedicated logger thread.

pub mod activity;
pub mod jsonl;
