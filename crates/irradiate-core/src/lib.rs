//! # Irradiate Core
//!
//! `irradiate-core` injects synthetic single-event upsets, single-bit memory
//! corruptions as caused by cosmic rays, into the address space of a running
//! process. It is meant for testing how software copes with transient
//! hardware faults.
//!
//! ## Architecture Overview
//!
//! Injection runs in cycles. Each cycle
//!
//! 1. enumerates the readable memory of the target ([`region`]),
//! 2. plans a batch of flips for the requested flip rate ([`schedule`]),
//! 3. flips the batch, each flip at a randomly selected address
//!    ([`selector`], [`flip`]),
//! 4. waits an exponentially distributed time before the next cycle.
//!
//! [`Injector`] drives this loop until the target disappears.
//!
//! The process under test is abstracted by the [`target::Target`] trait,
//! implemented for live processes by [`target::ProcessTarget`]. Everything
//! that happens is reported to an [`observer::InjectionObserver`].
//!
//! ## Platform Support
//!
//! [`target::ProcessTarget`] uses `/proc/<pid>/maps` and `/proc/<pid>/mem`
//! and thus requires Linux and ptrace access to the target process.

#![warn(missing_docs)]

pub mod flip;
pub mod injector;
pub mod observer;
pub mod region;
pub mod schedule;
pub mod selector;
pub mod target;
#[cfg(test)]
mod testing;
pub mod util;

pub use crate::injector::{
    BuildError, InjectionReport, InjectionStats, Injector, InjectorConfig, InjectorState,
    StopReason,
};
