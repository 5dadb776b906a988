//! Utility types and constants used throughout the injector.
//!
//! - [`Size`] - Memory size representation
//! - Constants for scheduling and retries ([`MIN_INTERVAL`], [`MAX_FLIP_RETRIES`], etc.)
//! - Progress reporting utilities ([`NamedProgress`])
//! - Random number generation ([`Rng`])

mod constants;
mod named_progress;
mod rng;
mod size;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;
pub use self::rng::Rng;
pub use self::size::Size;
