//! Core types for courier.
//!
//! This crate provides transport-free types shared by the request pipeline
//! and the realtime channel in `courier-client`.
//!
//! ## Modules
//!
//! - [`error`]: Failure kinds used to classify client errors
//! - [`envelope`]: Realtime wire envelope (`{"type": ..., "data": ...}`)

mod envelope;
mod error;

pub use envelope::*;
pub use error::*;
