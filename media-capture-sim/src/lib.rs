//! # media-capture-sim
//!
//! Simulation backend for `media-capture-core`: synthetic source providers
//! with deterministic timestamps and a scripted factory. Used by the
//! integration tests and for exercising the engine on machines without real
//! capture devices.

pub mod factory;
pub mod synthetic;

pub use factory::{SimSourceFactory, SourceScript};
pub use synthetic::{ReleaseHook, StallingSource, SyntheticConfig, SyntheticSource};
