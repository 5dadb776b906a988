//! # Irradiate
//!
//! Irradiate injects single-event upsets (single-bit memory corruptions) into
//! the memory of a running process at a configurable rate, for testing the
//! resilience of software against transient hardware faults.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Build the crate
//! cargo build --release
//!
//! # Flip on average 0.1 bits per MiB of readable memory per second in process 1234
//! target/release/irradiate 1234 0.1
//! ```
//!
//! Writing to another process's memory requires ptrace access to it, e.g. by
//! running as the same user with `kernel.yama.ptrace_scope = 0`, or as root.
//! Set `RUST_LOG=debug` to log every single flip.
//!
//! ## Modules
//!
//! - `region`: Discovery of the readable memory of a process.
//! - `selector`: Uniform selection of addresses over that memory.
//! - `flip`: The read-modify-write bit flip with retries.
//! - `schedule`: Conversion of flip rates into batches and waits.
//! - `injector`: The injection loop.
//! - `target`: Access to the process under test.
//! - `observer`: Reporting of injection events.
//! - `util`: Various helpers.

pub use irradiate_core::*;
