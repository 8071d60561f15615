//! Query execution
//!
//! Runs validated queries against a dataset snapshot under a time budget and
//! a row cap.

pub mod executor;
pub mod result;

pub use executor::*;
pub use result::*;
