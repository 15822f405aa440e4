//! Device implementations.
//!
//! This module contains concrete implementations of
//! [`ActuatorDevice`](crate::traits::ActuatorDevice).
//!
//! # Available Implementations
//!
//! - `mock`: Simulated locomotive for mock mode and tests

pub mod mock;

pub use mock::*;
