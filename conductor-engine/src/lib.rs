//! The Plan-Act-Observe engine: planner, executor, observer, result
//! formatter, and language resolver, wired into one streaming run by
//! `EngineLoop`. See `SPEC_FULL.md` §4 for the full loop semantics.

pub mod args;
pub mod engine;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod language;
pub mod observer;
pub mod planner;

pub use args::resolve_args;
pub use engine::EngineLoop;
pub use error::{EngineError, EngineResult};
pub use executor::{ExecutionOutcome, Executor};
pub use formatter::ResultFormatter;
pub use language::{LanguageContext, LanguageResolver, SUPPORTED_LANGUAGES};
pub use observer::Observer;
pub use planner::{ConcludeReason, PlanDecision, Planner};
