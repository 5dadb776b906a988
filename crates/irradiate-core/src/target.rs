//! Target processes.
//!
//! A [`Target`] bundles the two resources the injector needs from the process
//! under test: its memory layout report and a read-write handle onto its
//! address space. [`ProcessTarget`] provides both through procfs.

use std::io;

use thiserror::Error;

use crate::flip::{MemoryAccess, ProcessMemory};
use crate::region::{ParseError, RegionSet, enumerate_readable_regions};

/// Errors that can occur while accessing a target process.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The layout or memory resource of the target is gone.
    #[error("target process {pid} not found")]
    TargetNotFound {
        /// Process identifier of the target
        pid: u32,
    },
    /// The layout report contains a malformed line.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An I/O error not caused by the target exiting.
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] io::Error),
}

impl TargetError {
    /// Classifies an I/O error raised while accessing the procfs entries of `pid`.
    ///
    /// Missing entries and `ESRCH` mean the target has exited, everything else
    /// is assumed to be transient.
    pub fn from_io(pid: u32, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH) {
            TargetError::TargetNotFound { pid }
        } else {
            TargetError::TransientIo(err)
        }
    }

    /// Returns `true` if the error means the target has disappeared.
    pub fn is_target_not_found(&self) -> bool {
        matches!(self, TargetError::TargetNotFound { .. })
    }
}

/// A process whose memory can be enumerated and modified.
///
/// Implementations hand out a fresh memory handle on every call to
/// [`open_memory()`](Target::open_memory); the handle is released when it is
/// dropped.
pub trait Target {
    /// Read-write handle onto the target's address space.
    type Memory: MemoryAccess;

    /// Process identifier of the target.
    fn pid(&self) -> u32;

    /// Enumerates the currently readable regions of the target.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::TargetNotFound`] if the target is gone,
    /// [`TargetError::Parse`] for a malformed layout report and
    /// [`TargetError::TransientIo`] for other I/O failures.
    fn regions(&self) -> Result<RegionSet, TargetError>;

    /// Opens a read-write handle onto the target's address space.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::TargetNotFound`] if the target is gone and
    /// [`TargetError::TransientIo`] otherwise.
    fn open_memory(&self) -> Result<Self::Memory, TargetError>;
}

/// A live process, accessed through `/proc/<pid>/maps` and `/proc/<pid>/mem`.
///
/// Writing another process's memory requires ptrace access to it (same user
/// and a permissive `kernel.yama.ptrace_scope`, or `CAP_SYS_PTRACE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTarget {
    pid: u32,
}

impl ProcessTarget {
    /// Creates a target for process `pid`. The process is not accessed yet.
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl Target for ProcessTarget {
    type Memory = ProcessMemory;

    fn pid(&self) -> u32 {
        self.pid
    }

    fn regions(&self) -> Result<RegionSet, TargetError> {
        enumerate_readable_regions(self.pid)
    }

    fn open_memory(&self) -> Result<ProcessMemory, TargetError> {
        ProcessMemory::open(self.pid).map_err(|e| TargetError::from_io(self.pid, e))
    }
}
