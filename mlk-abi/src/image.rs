//! MLK executable image format.
//!
//! The loader consumes a 16-byte little-endian header followed by a flat,
//! position-independent code image:
//!
//! | Offset | Size | Meaning |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | Magic `'M' 'L' 'K' 0x01`                |
//! | 4      | 4    | Entry offset from code start            |
//! | 8      | 4    | Code size in bytes (1 ..= 1 MiB)        |
//! | 12     | 4    | Reserved, must be 0                     |
//! | 16     | n    | Raw code                                |

use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Image magic: `'M' 'L' 'K'` followed by format version 1.
pub const MAGIC: [u8; 4] = [b'M', b'L', b'K', 0x01];

/// Maximum accepted code size (1 MiB).
pub const MAX_CODE_SIZE: u32 = 1024 * 1024;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 16;

/// Errors from [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// Magic bytes did not match.
    BadMagic,
    /// Code size was zero or above [`MAX_CODE_SIZE`].
    BadSize,
    /// Entry offset was not inside the code image.
    BadEntry,
    /// Reserved field was non-zero.
    BadReserved,
    /// The byte slice was shorter than the header claims.
    Truncated,
}

/// The raw on-disk header.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, FromBytes, Immutable, KnownLayout)]
pub struct ImageHeader {
    /// Magic bytes, see [`MAGIC`].
    pub magic: [u8; 4],
    /// Entry point offset from the start of the code.
    pub entry_offset: u32,
    /// Code size in bytes.
    pub code_size: u32,
    /// Reserved, must be zero.
    pub reserved: u32,
}

/// Parse and validate an MLK image.
///
/// Returns the validated header and the code slice. All header rules are
/// enforced here so the loader can trust the result unconditionally.
pub fn parse(data: &[u8]) -> Result<(ImageHeader, &[u8]), ImageError> {
    let (header, rest) =
        ImageHeader::read_from_prefix(data).map_err(|_| ImageError::Truncated)?;

    if header.magic != MAGIC {
        return Err(ImageError::BadMagic);
    }
    if header.code_size == 0 || header.code_size > MAX_CODE_SIZE {
        return Err(ImageError::BadSize);
    }
    if header.reserved != 0 {
        return Err(ImageError::BadReserved);
    }
    if header.entry_offset >= header.code_size {
        return Err(ImageError::BadEntry);
    }
    if rest.len() < header.code_size as usize {
        return Err(ImageError::Truncated);
    }

    Ok((header, &rest[..header.code_size as usize]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a header + code image into a fixed buffer; returns (buf, len).
    fn image(entry: u32, code_size: u32, reserved: u32, code: &[u8]) -> ([u8; 64], usize) {
        let mut buf = [0u8; 64];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&entry.to_le_bytes());
        buf[8..12].copy_from_slice(&code_size.to_le_bytes());
        buf[12..16].copy_from_slice(&reserved.to_le_bytes());
        buf[16..16 + code.len()].copy_from_slice(code);
        (buf, HEADER_SIZE + code.len())
    }

    #[test]
    fn test_valid_image() {
        let code = [0x01, 0x00, 0x00, 0xD4];
        let (buf, len) = image(0, 4, 0, &code);
        let (header, parsed_code) = parse(&buf[..len]).unwrap();
        assert_eq!(header.entry_offset, 0);
        assert_eq!(header.code_size, 4);
        assert_eq!(parsed_code, &code);
    }

    #[test]
    fn test_bad_magic() {
        let (mut buf, len) = image(0, 4, 0, &[0; 4]);
        buf[3] = 0x02; // wrong version byte
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadMagic));
    }

    #[test]
    fn test_zero_code_size() {
        let (buf, len) = image(0, 0, 0, &[]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadSize));
    }

    #[test]
    fn test_oversize_code() {
        let (buf, len) = image(0, MAX_CODE_SIZE + 1, 0, &[]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadSize));
    }

    #[test]
    fn test_entry_beyond_code() {
        let (buf, len) = image(4, 4, 0, &[0; 4]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadEntry));
        let (buf, len) = image(8, 4, 0, &[0; 4]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadEntry));
    }

    #[test]
    fn test_nonzero_reserved() {
        let (buf, len) = image(0, 4, 1, &[0; 4]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::BadReserved));
    }

    #[test]
    fn test_truncated_code() {
        let (buf, len) = image(0, 8, 0, &[0; 4]);
        assert_eq!(parse(&buf[..len]), Err(ImageError::Truncated));
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(parse(&MAGIC), Err(ImageError::Truncated));
    }
}
