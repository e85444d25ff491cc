//! # ck-core
//!
//! Core types for causalkit:
//! - Error taxonomy and `Result` alias
//! - The [`Table`] tabular data model (ordered named columns with an
//!   explicit missing-value sentinel)
//!
//! Algorithmic crates depend on this one, never the other way round.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod table;

pub use error::{Error, Result};
pub use table::{Column, Table};
