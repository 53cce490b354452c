//! File header/footer protocol.
//!
//! Every file starts with `{magic:u32, format_name:varstring, version:u32}`
//! and ends with `{footer_magic:u32, algorithm:u32, checksum:u64}`. The
//! checksum covers every byte before it, footer magic and algorithm
//! included. Metadata readers recompute the checksum before trusting the
//! content; data readers validate lazily via [`check_footer`].

use crc32fast::Hasher;
use tessera_core::{Error, Result};

use crate::io::{IndexInput, IndexOutput};

/// Leading magic of every tessera file.
pub const FORMAT_MAGIC: u32 = 0x3FD7_6C17;

/// Trailing magic; distinct from [`FORMAT_MAGIC`].
pub const FOOTER_MAGIC: u32 = 0x17C6_D73F;

/// Footer byte length: magic + algorithm + checksum.
pub const FOOTER_LEN: u64 = 16;

/// Checksum algorithm id for CRC32; the only one currently written.
pub const CHECKSUM_CRC32: u32 = 0;

/// Write the standard file header.
pub fn write_header(out: &mut dyn IndexOutput, format: &str, version: u32) -> Result<()> {
    out.write_u32(FORMAT_MAGIC)?;
    out.write_vstr(format)?;
    out.write_u32(version)
}

/// Validate the header and return the version found.
pub fn check_header(
    input: &mut dyn IndexInput,
    format: &str,
    min_version: u32,
    max_version: u32,
) -> Result<u32> {
    let magic = input.read_u32()?;
    if magic != FORMAT_MAGIC {
        return Err(Error::Index(format!(
            "while checking header of '{format}': invalid magic {magic:#010x}"
        )));
    }
    let found = input.read_vstr()?;
    if found != format {
        return Err(Error::Index(format!(
            "while checking header: format mismatch '{found}' != '{format}'"
        )));
    }
    let version = input.read_u32()?;
    if version < min_version || version > max_version {
        return Err(Error::Index(format!(
            "while checking header of '{format}': unsupported version {version}"
        )));
    }
    Ok(version)
}

/// Write the standard footer and close out the checksum.
pub fn write_footer(out: &mut dyn IndexOutput) -> Result<()> {
    out.write_u32(FOOTER_MAGIC)?;
    out.write_u32(CHECKSUM_CRC32)?;
    let checksum = out.checksum();
    out.write_u64(checksum)
}

/// Recompute the stream checksum over everything before the stored value.
pub fn checksum(input: &dyn IndexInput) -> Result<u64> {
    let length = input.length();
    if length < FOOTER_LEN {
        return Err(Error::Index(format!(
            "file of {length} bytes cannot carry a footer"
        )));
    }
    let mut cursor = input.reopen()?;
    let mut hasher = Hasher::new();
    let mut remaining = length - 8;
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        cursor.read_bytes(&mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    Ok(u64::from(hasher.finalize()))
}

/// Validate footer magic, algorithm, and checksum; return the checksum.
pub fn check_footer(input: &mut dyn IndexInput) -> Result<u64> {
    let length = input.length();
    if length < FOOTER_LEN {
        return Err(Error::Index(format!(
            "while validating footer: file of {length} bytes is too short"
        )));
    }
    input.seek(length - FOOTER_LEN)?;
    let magic = input.read_u32()?;
    if magic != FOOTER_MAGIC {
        return Err(Error::Index(format!(
            "while validating footer: invalid magic {magic:#010x}"
        )));
    }
    let algorithm = input.read_u32()?;
    if algorithm != CHECKSUM_CRC32 {
        return Err(Error::Index(format!(
            "while validating footer: unknown checksum algorithm {algorithm}"
        )));
    }
    let stored = input.read_u64()?;
    let computed = checksum(input)?;
    if stored != computed {
        return Err(Error::checksum_mismatch(stored, computed));
    }
    Ok(stored)
}

/// Byte length of the footer's payload region a reader must not consume.
#[inline]
pub const fn footer_len() -> u64 {
    FOOTER_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferOutput, SliceInput};
    use std::sync::Arc;

    fn sealed_file(body: &[u8]) -> Vec<u8> {
        let mut out = BufferOutput::new();
        write_header(&mut out, "test_format", 3).unwrap();
        out.write_bytes(body).unwrap();
        write_footer(&mut out).unwrap();
        out.into_bytes()
    }

    #[test]
    fn test_header_roundtrip() {
        let bytes = sealed_file(b"body");
        let mut input = SliceInput::new(Arc::new(bytes));
        let version = check_header(&mut input, "test_format", 0, 3).unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = sealed_file(b"");
        bytes[0] ^= 0xFF;
        let mut input = SliceInput::new(Arc::new(bytes));
        assert!(matches!(
            check_header(&mut input, "test_format", 0, 3),
            Err(Error::Index(_))
        ));
    }

    #[test]
    fn test_header_rejects_version_range() {
        let bytes = sealed_file(b"");
        let mut input = SliceInput::new(Arc::new(bytes));
        assert!(check_header(&mut input, "test_format", 0, 2).is_err());
    }

    #[test]
    fn test_header_rejects_format_name() {
        let bytes = sealed_file(b"");
        let mut input = SliceInput::new(Arc::new(bytes));
        assert!(check_header(&mut input, "another_format", 0, 3).is_err());
    }

    #[test]
    fn test_footer_roundtrip() {
        let bytes = sealed_file(b"some body bytes");
        let mut input = SliceInput::new(Arc::new(bytes));
        check_footer(&mut input).unwrap();
    }

    #[test]
    fn test_footer_detects_any_byte_flip() {
        let pristine = sealed_file(b"sensitive");
        // flip every byte position except the stored checksum itself;
        // flipping checksum bytes is detected against the recomputation
        for i in 0..pristine.len() {
            let mut corrupt = pristine.clone();
            corrupt[i] ^= 0x01;
            let mut input = SliceInput::new(Arc::new(corrupt));
            assert!(
                check_footer(&mut input).is_err(),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_footer_too_short() {
        let mut input = SliceInput::new(Arc::new(vec![0u8; 8]));
        assert!(check_footer(&mut input).is_err());
    }
}
