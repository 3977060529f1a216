//! Impact tracing for ecotrace.
//!
//! Records handed over by adapters are stamped, queued on a single
//! background worker, scored remotely, and fanned back into
//! [`PendingResult`] handles and the [`Trace`] tree that was active when
//! they were submitted.
//!
//! ```no_run
//! # use ecotrace_tracer::{ImpactTracer, TraceOptions};
//! # use ecotrace_core::UsageRecord;
//! # fn demo(tracer: &ImpactTracer) -> ecotrace_core::Result<()> {
//! let trace = tracer.trace(TraceOptions::default().with_session("chat-42"));
//! tracer.submit_usage(UsageRecord::new("gpt-4o").with_tokens(100, 100))?;
//! let impact = trace.impact(Some(std::time::Duration::from_secs(5)))?;
//! println!("{:.3} Wh", impact.total_energy_wh);
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod pending;
pub mod trace;

pub use completion::Completion;
pub use dispatch::{DispatchQueue, DispatchStats};
pub use engine::{ImpactTracer, TracerSettings};
pub use pending::PendingResult;
pub use trace::{Trace, TraceGuard, TraceOptions};
