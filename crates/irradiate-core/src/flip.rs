//! Single-bit flips in a target's address space.
//!
//! A flip is a read-modify-write of one byte: the byte at a randomly selected
//! address is read, one bit is inverted, and the result is written back. No
//! attempt is made to synchronize with the target, which may write the same
//! byte concurrently.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::observer::InjectionObserver;
use crate::region::RegionSet;
use crate::selector::select_target;

/// A bit position within a byte (0-7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Bit(u8);

impl Bit {
    /// Creates a bit index, returning `None` if `index` is not below 8.
    pub fn new(index: u8) -> Option<Self> {
        (index < 8).then_some(Bit(index))
    }

    /// Draws a bit index uniformly from `0..8`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Bit(rng.random_range(0..8))
    }

    /// The bit index.
    pub fn index(self) -> u8 {
        self.0
    }

    /// A byte with only this bit set.
    pub fn mask(self) -> u8 {
        1 << self.0
    }
}

/// Inverts `bit` in `value`.
///
/// Flipping the same bit twice restores the original value.
///
/// ```
/// use irradiate_core::flip::{Bit, flip_bit};
///
/// let bit = Bit::new(3).unwrap();
/// assert_eq!(flip_bit(0x00, bit), 0x08);
/// assert_eq!(flip_bit(flip_bit(0xa5, bit), bit), 0xa5);
/// ```
pub fn flip_bit(value: u8, bit: Bit) -> u8 {
    value ^ bit.mask()
}

/// Byte-granular access to a target's address space.
pub trait MemoryAccess {
    /// Reads the byte at absolute address `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is not mapped or not readable.
    fn read_byte(&mut self, addr: u64) -> io::Result<u8>;

    /// Writes `value` to absolute address `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is not mapped or the write is rejected.
    fn write_byte(&mut self, addr: u64, value: u8) -> io::Result<()>;
}

/// Read-write handle onto `/proc/<pid>/mem`.
///
/// The file offset is the virtual address in the target. The handle is closed
/// when dropped.
#[derive(Debug)]
pub struct ProcessMemory {
    file: File,
}

impl ProcessMemory {
    /// Opens the address space of process `pid` for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the process does not exist or access is denied.
    pub fn open(pid: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/proc/{}/mem", pid))?;
        Ok(Self { file })
    }
}

impl MemoryAccess for ProcessMemory {
    fn read_byte(&mut self, addr: u64) -> io::Result<u8> {
        let mut value = [0u8; 1];
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.read_exact(&mut value)?;
        Ok(value[0])
    }

    fn write_byte(&mut self, addr: u64, value: u8) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(&[value])?;
        self.file.flush()
    }
}

/// Direction of a single-bit flip.
#[derive(Clone, Copy, Debug, Serialize, Eq, PartialEq)]
pub enum FlipDirection {
    /// Bit flipped from 0 to 1
    ZeroToOne,
    /// Bit flipped from 1 to 0
    OneToZero,
}

/// A bit flip performed in the target.
#[derive(Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct BitFlip {
    /// Virtual address of the flipped byte
    pub addr: u64,
    /// Bitmask of the flipped bit
    pub bitmask: u8,
    /// The byte value before the flip
    pub data: u8,
}

impl BitFlip {
    /// Constructor for BitFlip
    pub fn new(addr: u64, bit: Bit, data: u8) -> Self {
        BitFlip {
            addr,
            bitmask: bit.mask(),
            data,
        }
    }

    /// The byte value after the flip.
    pub fn flipped(&self) -> u8 {
        self.data ^ self.bitmask
    }

    /// Calculate the FlipDirection (1->0 or 0->1) of this BitFlip
    pub fn flip_direction(&self) -> FlipDirection {
        match self.bitmask & self.data {
            0 => FlipDirection::ZeroToOne,
            _ => FlipDirection::OneToZero,
        }
    }
}

impl core::fmt::Debug for BitFlip {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitFlip")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("bitmask", &format_args!("{:#x}", self.bitmask))
            .field("data", &format_args!("{:#x}", self.data))
            .finish()
    }
}

/// Errors of a flip operation.
#[derive(Debug, Error)]
pub enum FlipError {
    /// There is no readable memory to select an address from.
    #[error("no readable memory to flip")]
    EmptyRegionSet,
    /// Reading the byte failed, e.g. because the address was unmapped.
    #[error("failed to read {addr:#x}: {source}")]
    Read {
        /// Selected address
        addr: u64,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Writing the byte back failed.
    #[error("failed to write {addr:#x}: {source}")]
    Write {
        /// Selected address
        addr: u64,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Every attempt failed.
    #[error("failed to flip after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: usize,
    },
}

fn try_flip<M, R>(memory: &mut M, regions: &RegionSet, rng: &mut R) -> Result<BitFlip, FlipError>
where
    M: MemoryAccess + ?Sized,
    R: Rng + ?Sized,
{
    let target = select_target(regions, rng).ok_or(FlipError::EmptyRegionSet)?;
    let data = memory
        .read_byte(target.addr)
        .map_err(|source| FlipError::Read {
            addr: target.addr,
            source,
        })?;
    memory
        .write_byte(target.addr, flip_bit(data, target.bit))
        .map_err(|source| FlipError::Write {
            addr: target.addr,
            source,
        })?;
    Ok(BitFlip::new(target.addr, target.bit, data))
}

/// Flips one randomly selected bit in `regions`.
///
/// A failed attempt is reported to `observer` and retried at a freshly drawn
/// address, up to `max_attempts` attempts in total.
///
/// # Errors
///
/// * [`FlipError::EmptyRegionSet`] if `regions` holds no memory
/// * [`FlipError::RetriesExhausted`] if every attempt failed
pub fn flip_one<M, R>(
    memory: &mut M,
    regions: &RegionSet,
    rng: &mut R,
    max_attempts: usize,
    observer: &mut dyn InjectionObserver,
) -> Result<BitFlip, FlipError>
where
    M: MemoryAccess + ?Sized,
    R: Rng + ?Sized,
{
    if regions.is_empty() {
        return Err(FlipError::EmptyRegionSet);
    }
    for attempt in 1..=max_attempts {
        match try_flip(memory, regions, rng) {
            Ok(flip) => {
                observer.flip_succeeded(&flip);
                return Ok(flip);
            }
            Err(e) => observer.flip_attempt_failed(attempt, &e),
        }
    }
    let err = FlipError::RetriesExhausted {
        attempts: max_attempts,
    };
    observer.flip_abandoned(&err);
    Err(err)
}
