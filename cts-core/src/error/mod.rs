//! Error handling for the cluster test system
//!
//! The harness distinguishes a small number of error categories, each with a
//! fixed recovery rule:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Fatal at construction     │  Recovered locally              │
//! │  • Configuration           │  • Remote execution (retried,   │
//! │  • Unknown node            │    then reported as failure)    │
//! │  • Not applicable          │  • Status mismatch (warning)    │
//! │                            │  • Audit failure (counted)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Fatal to a run            │  Aggregated                     │
//! │  • Scenario setup          │  • Multiple (teardown unwind)   │
//! │  • Run aborted (bad news)  │                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod types;

pub use types::{format_errors, CtsError, CtsResult, Result};
