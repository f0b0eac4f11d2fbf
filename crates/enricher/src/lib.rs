//! NewsForge enrichment worker library
//!
//! The commentary half of the pipeline: an AI provider client behind
//! the key-pool balancer, the enrichment worker semantics (cache-first
//! lookup, snapshot cache, store persistence, deterministic fallback),
//! and the rate-limited queue consumer.

pub mod consumer;
pub mod prompt;
pub mod provider;
pub mod worker;

pub use consumer::QueueConsumer;
pub use provider::{create_provider, CommentaryProvider, Completion};
pub use worker::{EnrichOutcome, EnrichmentWorker};
