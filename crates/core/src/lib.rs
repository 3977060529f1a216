//! # ecotrace Core
//!
//! Domain types, traits, and error definitions for ecotrace, the impact
//! accounting layer for calls made against AI inference APIs.
//! It owns no I/O, threads or async runtime; its dependencies are limited to
//! serde/serde_json, thiserror, chrono and async-trait. It defines the domain
//! model that the scorer, tracer, and adapters implement against.
//!
//! ## Seams
//!
//! - [`UsageProducer`]: adapters turn a provider call into a [`UsageRecord`].
//! - [`ImpactScorer`]: the remote service that turns records into [`ImpactResult`]s.
//!
//! Everything between those two seams (queueing, waiting, trace aggregation)
//! lives in `ecotrace-tracer`.

pub mod adapter;
pub mod error;
pub mod impact;
pub mod scorer;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use adapter::{ChatCompletion, ChatCompletionUsage, UsageProducer};
pub use error::{Error, Result, ScorerError};
pub use impact::{AggregateImpact, ImpactMetrics, ImpactResult, RowError};
pub use scorer::{ImpactScorer, ScoreRequest, ScoreResponse};
pub use usage::{ImageDimensions, Task, UsageRecord};
