use crate::util::MIB;

/// Amount of memory in bytes.
///
/// Flip rates are expressed per mebibyte (1 MiB = 1024 * 1024 bytes), so
/// [`Size::mib`] is the conversion the rate scheduler works with.
///
/// # Examples
///
/// ```
/// use irradiate_core::util::Size;
///
/// let size = Size::from_bytes(4 * 1024 * 1024);
/// assert_eq!(size.bytes(), 4 << 20);
/// assert_eq!(size.mib(), 4.0);
///
/// let small = Size::from_bytes(512 * 1024);
/// assert_eq!(small.mib(), 0.5);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(u64);

impl Size {
    /// Creates a size of `bytes` bytes.
    pub const fn from_bytes(bytes: u64) -> Self {
        Size(bytes)
    }

    /// Converts this size to bytes.
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Converts this size to (fractional) mebibytes.
    pub fn mib(&self) -> f64 {
        self.0 as f64 / MIB as f64
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x} bytes ({:.1} MiB)", self.0, self.mib())
    }
}
