//! Core domain models
//!
//! Values, documents, steps and the state of a run. Nothing in here invokes
//! operations; that is the job of [`crate::execution`].

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod step;
pub mod table;
pub mod value;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use registry::StepRegistry;
pub use state::*;
pub use step::*;
pub use table::{Aggregate, GroupedTable, Table};
pub use value::*;
