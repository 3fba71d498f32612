//! QR code rendering for the advertisement URL.
//!
//! The QR bitmap itself is produced by the `qrcode` crate (a pure
//! function, string to a grid of booleans, treated as an external
//! collaborator); this module is responsible only for picking the
//! error-correction level and turning the resulting bitmap into the
//! half-block glyph art the original `print_qrcode()` produced.

use std::fmt::Write as _;

use qrcode::{EcLevel, QrCode};

use crate::error::{Error, Result};

const MARGIN: usize = 2;

/// Renders `text` (the advertisement URL) as a QR code using
/// error-correction level L, as half-block Unicode glyphs with a
/// 2-cell margin, matching the original's glyph table:
/// full block, upper half block, lower half block, space.
pub fn render(text: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(text, EcLevel::L)
        .map_err(|e| Error::StartupConfig(format!("failed to encode QR code: {e}")))?;
    let width = code.width();
    // `qrcode`'s `Color::Dark` is a "module present" bit, matching the
    // original's `qrcode->data[...] & 0x01`.
    let dark = |x: i32, y: i32| -> bool {
        if x < 0 || y < 0 || x as usize >= width || y as usize >= width {
            false
        } else {
            code[(x as usize, y as usize)] == qrcode::Color::Dark
        }
    };

    let mut out = String::new();
    out.push('\n');

    let full_margin_row: String = "\u{2588}".repeat(width + MARGIN * 4);
    for _ in 0..MARGIN {
        out.push_str(&full_margin_row);
        out.push('\n');
    }

    let mut row = (0..width).step_by(2);
    while let Some(iy) = row.next() {
        for _ in 0..MARGIN * 2 {
            out.push('\u{2588}');
        }
        for ix in 0..width as i32 {
            // A dark module is rendered as blank (letting a dark
            // terminal background show through) and a light module as
            // a filled glyph, which is what makes these half-block
            // renderings scannable on the usual dark-on-light terminal
            // color scheme. So the glyph fills exactly the halves that
            // are *not* dark.
            let top_dark = dark(ix, iy as i32);
            let bottom_dark = dark(ix, iy as i32 + 1);
            let glyph = match (top_dark, bottom_dark) {
                (false, false) => '\u{2588}', // full block: neither half dark
                (false, true) => '\u{2580}',  // upper half block: top light, bottom dark
                (true, false) => '\u{2584}',  // lower half block: top dark, bottom light
                (true, true) => ' ',          // space: both halves dark
            };
            let _ = write!(out, "{glyph}");
        }
        for _ in 0..MARGIN * 2 {
            out.push('\u{2588}');
        }
        out.push('\n');
    }

    for _ in 0..MARGIN {
        out.push_str(&full_margin_row);
        out.push('\n');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_non_empty_grid() {
        let art = render("OPENPGP+SKT://DEADBEEF@127.0.0.1:1234").unwrap();
        assert!(art.lines().count() > 4);
        assert!(art.chars().any(|c| c == '\u{2588}'));
    }
}
