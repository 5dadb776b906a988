//! Discovery of the readable memory of a target process.
//!
//! The layout report of a process (`/proc/<pid>/maps`) lists one mapping per
//! line:
//!
//! ```text
//! 55d0c6a00000-55d0c6a21000 rw-p 00000000 00:00 0          [heap]
//! ```
//!
//! Only the address range and the permission field are of interest here. A
//! mapping is readable if its permission field starts with `r`.

use std::fs;

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::target::TargetError;
use crate::util::Size;

/// One contiguous readable span of a target's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryRegion {
    /// First address of the region
    pub start: u64,
    /// Number of bytes in the region
    pub length: u64,
}

impl MemoryRegion {
    /// Creates a region spanning `length` bytes from `start`.
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// First address past the end of the region.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

/// Errors produced while interpreting a layout report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not have the `<start>-<end> <perms> ...` shape.
    #[error("line {line}: malformed mapping {text:?}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// The offending line
        text: String,
    },
    /// An address field is not a lowercase hex number that fits in 64 bits.
    #[error("line {line}: invalid address {field:?}")]
    InvalidAddress {
        /// 1-based line number
        line: usize,
        /// The offending field
        field: String,
    },
    /// The permission field is not of the form `[r-][w-][x-][ps]`.
    #[error("line {line}: invalid permissions {field:?}")]
    InvalidPermissions {
        /// 1-based line number
        line: usize,
        /// The offending field
        field: String,
    },
    /// The end address does not lie past the start address.
    #[error("line {line}: empty range {start:#x}-{end:#x}")]
    EmptyRange {
        /// 1-based line number
        line: usize,
        /// Start address
        start: u64,
        /// End address
        end: u64,
    },
    /// A region with zero length was passed to [`RegionSet::new`].
    #[error("region at {start:#x} has zero length")]
    ZeroLength {
        /// Start address
        start: u64,
    },
    /// A region extends past the end of the 64-bit address space.
    #[error("region at {start:#x} with length {length:#x} exceeds the address space")]
    AddressOverflow {
        /// Start address
        start: u64,
        /// Length in bytes
        length: u64,
    },
    /// A region starts before its predecessor ends.
    #[error("region {start:#x}-{end:#x} overlaps or precedes the region before it")]
    Overlap {
        /// Start address
        start: u64,
        /// End address
        end: u64,
    },
}

/// Access permissions of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// Mapping is readable
    pub read: bool,
    /// Mapping is writable
    pub write: bool,
    /// Mapping is executable
    pub execute: bool,
    /// Mapping is shared rather than private
    pub shared: bool,
}

impl Permissions {
    fn parse(field: &[u8]) -> Option<Self> {
        let flag = |byte: u8, set: u8| match byte {
            b'-' => Some(false),
            b if b == set => Some(true),
            _ => None,
        };
        match field {
            [r, w, x, s] => Some(Permissions {
                read: flag(*r, b'r')?,
                write: flag(*w, b'w')?,
                execute: flag(*x, b'x')?,
                shared: match *s {
                    b's' => true,
                    b'p' => false,
                    _ => return None,
                },
            }),
            _ => None,
        }
    }
}

/// A single parsed line of the layout report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// First address of the mapping
    pub start: u64,
    /// First address past the mapping
    pub end: u64,
    /// Access permissions
    pub perms: Permissions,
}

fn parse_address(line: usize, field: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidAddress {
        line,
        field: field.to_string(),
    };
    if field.is_empty() || !field.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(invalid());
    }
    u64::from_str_radix(field, 16).map_err(|_| invalid())
}

/// Parses one line of the layout report.
///
/// `line` is the 1-based line number used in error messages.
pub fn parse_mapping(line: usize, text: &str) -> Result<Mapping, ParseError> {
    let malformed = || ParseError::Malformed {
        line,
        text: text.to_string(),
    };
    let (range, rest) = text.split_once(' ').ok_or_else(malformed)?;
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;
    let start = parse_address(line, start)?;
    let end = parse_address(line, end)?;

    let (field, _) = rest.split_once(' ').ok_or_else(malformed)?;
    let perms =
        Permissions::parse(field.as_bytes()).ok_or_else(|| ParseError::InvalidPermissions {
            line,
            field: field.to_string(),
        })?;

    if end <= start {
        return Err(ParseError::EmptyRange { line, start, end });
    }
    Ok(Mapping { start, end, perms })
}

/// Parses a complete layout report into the readable regions it lists.
///
/// Regions keep the order of the report. Any line that cannot be parsed,
/// including a blank one, fails the whole report.
pub fn parse_maps(content: &str) -> Result<Vec<MemoryRegion>, ParseError> {
    let mut regions = vec![];
    for (idx, text) in content.lines().enumerate() {
        let mapping = parse_mapping(idx + 1, text)?;
        if mapping.perms.read {
            regions.push(MemoryRegion::new(mapping.start, mapping.end - mapping.start));
        }
    }
    Ok(regions)
}

/// The readable regions of a target at one point in time.
///
/// Regions are ascending and non-overlapping; the aggregate length is computed
/// once on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet {
    regions: Vec<MemoryRegion>,
    total: u64,
}

impl RegionSet {
    /// Creates a region set, validating that all regions are non-empty,
    /// within the address space, ascending and non-overlapping.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::ZeroLength`], [`ParseError::AddressOverflow`] or
    /// [`ParseError::Overlap`] if the regions violate these invariants.
    pub fn new(regions: Vec<MemoryRegion>) -> Result<Self, ParseError> {
        for region in &regions {
            if region.length == 0 {
                return Err(ParseError::ZeroLength {
                    start: region.start,
                });
            }
            if region.start.checked_add(region.length).is_none() {
                return Err(ParseError::AddressOverflow {
                    start: region.start,
                    length: region.length,
                });
            }
        }
        if let Some((_, next)) = regions
            .iter()
            .tuple_windows()
            .find(|(prev, next)| next.start < prev.end())
        {
            return Err(ParseError::Overlap {
                start: next.start,
                end: next.end(),
            });
        }
        let mut total = 0u64;
        for region in &regions {
            total = total
                .checked_add(region.length)
                .ok_or(ParseError::AddressOverflow {
                    start: region.start,
                    length: region.length,
                })?;
        }
        Ok(Self { regions, total })
    }

    /// Parses a layout report and keeps its readable regions.
    pub fn from_maps(content: &str) -> Result<Self, ParseError> {
        Self::new(parse_maps(content)?)
    }

    /// The regions in ascending address order.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Aggregate length of all regions in bytes.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    /// Aggregate length of all regions.
    pub fn total_size(&self) -> Size {
        Size::from_bytes(self.total)
    }

    /// Returns `true` if there is no readable memory.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Reads the layout report of process `pid` and returns its readable regions.
///
/// # Errors
///
/// * [`TargetError::TargetNotFound`] if the report does not exist
/// * [`TargetError::Parse`] if the report contains a malformed line
/// * [`TargetError::TransientIo`] for any other I/O failure
pub fn enumerate_readable_regions(pid: u32) -> Result<RegionSet, TargetError> {
    let content = fs::read_to_string(format!("/proc/{}/maps", pid))
        .map_err(|e| TargetError::from_io(pid, e))?;
    Ok(RegionSet::from_maps(&content)?)
}
