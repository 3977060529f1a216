//! Remote scorer implementations for ecotrace.
//!
//! All scorers implement the `ecotrace_core::ImpactScorer` trait.

pub mod http;

pub use http::HttpScorer;
