//! Batch translation of survey tables with an LLM.
//!
//! Every item is resolved through three tiers: human-supplied canned
//! overrides, a persistent translation cache, and a JSON-only model call for
//! whatever is left. Model results are appended to the cache so identical
//! text is never sent twice.

pub mod cache;
pub mod call_log;
pub mod canned;
pub mod config;
pub mod gateway;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
pub mod table;
