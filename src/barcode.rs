//! Code 39 barcode encoding and rasterisation.
//!
//! Ticket references are printed as Code 39 symbols: on emails as inline PNG
//! images (raster, because mail clients routinely block inline SVG) and on
//! the admin PDF export as vector bars. Both render from the same module
//! sequence produced here.

use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use std::io::Cursor;
use thiserror::Error;

/// Result type alias for barcode operations.
pub type Result<T> = std::result::Result<T, BarcodeError>;

/// Barcode encoding error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    /// The text contains a character Code 39 cannot encode.
    #[error("character {0:?} cannot be encoded in Code 39")]
    UnsupportedCharacter(char),

    /// The PNG encoder failed.
    #[error("PNG encoding failed: {0}")]
    Png(String),
}

/// Wide-to-narrow element ratio, in modules.
const WIDE: u32 = 3;

/// Modules of quiet zone on each side of the symbol.
const QUIET_ZONE: u32 = 10;

/// Code 39 wide/narrow patterns: nine elements per symbol, bars and spaces
/// alternating starting with a bar; `1` marks a wide element.
const fn pattern(c: char) -> Option<&'static [u8; 9]> {
    match c {
        '0' => Some(b"000110100"),
        '1' => Some(b"100100001"),
        '2' => Some(b"001100001"),
        '3' => Some(b"101100000"),
        '4' => Some(b"000110001"),
        '5' => Some(b"100110000"),
        '6' => Some(b"001110000"),
        '7' => Some(b"000100101"),
        '8' => Some(b"100100100"),
        '9' => Some(b"001100100"),
        'A' => Some(b"100001001"),
        'B' => Some(b"001001001"),
        'C' => Some(b"101001000"),
        'D' => Some(b"000011001"),
        'E' => Some(b"100011000"),
        'F' => Some(b"001011000"),
        'G' => Some(b"000001101"),
        'H' => Some(b"100001100"),
        'I' => Some(b"001001100"),
        'J' => Some(b"000011100"),
        'K' => Some(b"100000011"),
        'L' => Some(b"001000011"),
        'M' => Some(b"101000010"),
        'N' => Some(b"000010011"),
        'O' => Some(b"100010010"),
        'P' => Some(b"001010010"),
        'Q' => Some(b"000000111"),
        'R' => Some(b"100000110"),
        'S' => Some(b"001000110"),
        'T' => Some(b"000010110"),
        'U' => Some(b"110000001"),
        'V' => Some(b"011000001"),
        'W' => Some(b"111000000"),
        'X' => Some(b"010010001"),
        'Y' => Some(b"110010000"),
        'Z' => Some(b"011010000"),
        '-' => Some(b"010000101"),
        '.' => Some(b"110000100"),
        ' ' => Some(b"011000100"),
        '*' => Some(b"010010100"),
        '$' => Some(b"010101000"),
        '/' => Some(b"010100010"),
        '+' => Some(b"010001010"),
        '%' => Some(b"000101010"),
        _ => None,
    }
}

/// Encode text into a module sequence (`true` = dark module).
///
/// The start/stop `*` symbols are added here; callers pass the bare text.
/// Lowercase letters are folded to uppercase.
///
/// # Errors
///
/// Returns [`BarcodeError::UnsupportedCharacter`] for characters outside the
/// Code 39 alphabet.
pub fn encode(text: &str) -> Result<Vec<bool>> {
    let mut modules = Vec::new();
    let mut first = true;

    let symbols = std::iter::once('*')
        .chain(text.chars().map(|c| c.to_ascii_uppercase()))
        .chain(std::iter::once('*'));

    for c in symbols {
        let pat = pattern(c).ok_or(BarcodeError::UnsupportedCharacter(c))?;
        if !first {
            // Inter-character gap: one narrow space.
            modules.push(false);
        }
        first = false;
        for (i, wide) in pat.iter().enumerate() {
            let width = if *wide == b'1' { WIDE } else { 1 };
            let dark = i % 2 == 0;
            for _ in 0..width {
                modules.push(dark);
            }
        }
    }
    Ok(modules)
}

/// Render text as a Code 39 PNG.
///
/// `scale` is the module width in pixels; `height` the bar height in pixels.
/// A quiet zone is added on both sides.
///
/// # Errors
///
/// Returns an error for unencodable characters or PNG encoder failures.
pub fn render_png(text: &str, scale: u32, height: u32) -> Result<Vec<u8>> {
    let modules = encode(text)?;

    #[allow(clippy::cast_possible_truncation)]
    let symbol_width = modules.len() as u32;
    let width = (symbol_width + 2 * QUIET_ZONE) * scale;
    let mut img = GrayImage::from_pixel(width, height, Luma([255u8]));

    for (i, dark) in modules.iter().enumerate() {
        if !dark {
            continue;
        }
        #[allow(clippy::cast_possible_truncation)]
        let x0 = (QUIET_ZONE + i as u32) * scale;
        for x in x0..x0 + scale {
            for y in 0..height {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
    }

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut buf, ImageOutputFormat::Png)
        .map_err(|e| BarcodeError::Png(e.to_string()))?;
    Ok(buf.into_inner())
}

/// The portion of a ticket reference encoded on printed barcodes.
///
/// Full references are long; the trailing characters carry the uniqueness
/// (timestamp + random component), so scanners only need those.
#[must_use]
pub fn scan_window(reference: &str) -> &str {
    let len = reference.len();
    &reference[len.saturating_sub(12)..]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reference_charset() {
        let modules = encode("ENG-D001-ERED-170-A1B2C3").unwrap();
        assert!(!modules.is_empty());
        // Symbols are framed by the start/stop character.
        let star = encode("").unwrap();
        assert_eq!(star.len(), 2 * (6 * 1 + 3 * WIDE as usize) + 1);
    }

    #[test]
    fn rejects_unsupported_characters() {
        assert_eq!(
            encode("ABC_DEF").unwrap_err(),
            BarcodeError::UnsupportedCharacter('_')
        );
    }

    #[test]
    fn folds_lowercase() {
        assert_eq!(encode("abc").unwrap(), encode("ABC").unwrap());
    }

    #[test]
    fn png_has_signature_and_size() {
        let png = render_png("ENG-TEST", 2, 40).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn scan_window_takes_tail() {
        assert_eq!(scan_window("ENG-D001-ERED-1700000000123-A1B2C3"), "00123-A1B2C3");
        assert_eq!(scan_window("SHORT"), "SHORT");
    }
}
