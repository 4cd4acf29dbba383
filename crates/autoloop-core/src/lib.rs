//! Core types for autoloop
//!
//! This crate provides the fundamental types used throughout the autoloop
//! automation engine: ArgValue, ArgMap, Context, and the Clock abstraction.

mod clock;
mod context;
mod value;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::Context;
pub use value::{ArgMap, ArgValue, ArgValueError};
