//! Trait definitions for the actuator and session side effects.
//!
//! This module defines the seams that let train-queue:
//! - Drive a real locomotive or a mock one through the same gateway
//! - Report control sessions to an analytics collaborator
//!
//! # Submodules
//!
//! - `actuator`: Low-level device driver and the gateway command surface
//! - `observer`: Analytics hooks fired by the turn queue

pub mod actuator;
pub mod observer;

pub use actuator::*;
pub use observer::*;
