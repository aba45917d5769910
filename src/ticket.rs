//! Drink ticket rendering for Stand POS.
//!
//! Every unit sold gets one ticket the customer trades at the tap. Tickets
//! are fixed-size PNGs rendered with the built-in 8x8 raster font so no
//! system font is needed at the stand: header (stand name), flavor, the
//! trailing digits of the sale id, the payment method, and a fixed
//! disclaimer footer. The core supplies the fields; printing/exporting the
//! image is the caller's concern.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::PosError;
use crate::sales::PaymentMethod;

use font8x8::{UnicodeFonts, BASIC_FONTS};

pub const TICKET_WIDTH: u32 = 300;
pub const TICKET_HEIGHT: u32 = 450;

/// Sale id digits shown on the ticket; operators key these back in for
/// reversals.
const ID_DIGITS: usize = 6;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const FOOTER_LINES: [&str; 3] = [
    "VALID ONLY ON DATE OF ISSUE",
    "FOR THE DURATION OF THE EVENT",
    "NO REFUND AFTER ISSUE",
];

/// The four fields a ticket shows. Produced by the sale finalizer, one per
/// unit sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDoc {
    pub header: String,
    pub flavor: String,
    pub sale_id: i64,
    pub payment_method: PaymentMethod,
}

impl TicketDoc {
    /// The trailing digits of the sale id as printed on the ticket.
    pub fn short_id(&self) -> String {
        let digits = self.sale_id.to_string();
        let start = digits.len().saturating_sub(ID_DIGITS);
        digits[start..].to_string()
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the ticket as a 300x450 PNG.
pub fn render_ticket_png(doc: &TicketDoc) -> Result<Vec<u8>, PosError> {
    let mut img = RgbImage::from_pixel(TICKET_WIDTH, TICKET_HEIGHT, WHITE);

    // Frame
    draw_border(&mut img, 5, 5, TICKET_WIDTH - 6, TICKET_HEIGHT - 6, 3);

    // Header with a rule under it
    draw_text_centered(&mut img, 32, &doc.header.to_uppercase(), 2);
    draw_hline(&mut img, 50, TICKET_WIDTH - 50, 60, 2);

    // The flavor is what the tap reads at a glance
    draw_text_centered(&mut img, 170, &doc.flavor.to_uppercase(), 3);

    draw_text_centered(&mut img, 224, &format!("ID: {}", doc.short_id()), 2);
    draw_text_centered(
        &mut img,
        254,
        &format!("PAID: {}", doc.payment_method.as_str().to_uppercase()),
        2,
    );

    // Disclaimer footer
    let mut y = 350;
    for line in FOOTER_LINES {
        draw_text_centered(&mut img, y, line, 1);
        y += 20;
    }

    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Render and write the ticket for the external printer/exporter.
pub fn write_ticket_png(doc: &TicketDoc, path: &Path) -> Result<(), PosError> {
    let png = render_ticket_png(doc)?;
    fs::write(path, png).map_err(|e| PosError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Raster helpers
// ---------------------------------------------------------------------------

fn draw_hline(img: &mut RgbImage, x0: u32, x1: u32, y: u32, thickness: u32) {
    for dy in 0..thickness {
        for x in x0..=x1.min(img.width() - 1) {
            if y + dy < img.height() {
                img.put_pixel(x, y + dy, BLACK);
            }
        }
    }
}

fn draw_vline(img: &mut RgbImage, x: u32, y0: u32, y1: u32, thickness: u32) {
    for dx in 0..thickness {
        for y in y0..=y1.min(img.height() - 1) {
            if x + dx < img.width() {
                img.put_pixel(x + dx, y, BLACK);
            }
        }
    }
}

fn draw_border(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, thickness: u32) {
    draw_hline(img, x0, x1, y0, thickness);
    draw_hline(img, x0, x1, y1 - thickness + 1, thickness);
    draw_vline(img, x0, y0, y1, thickness);
    draw_vline(img, x1 - thickness + 1, y0, y1, thickness);
}

/// Blit one 8x8 glyph scaled up. Unknown characters render as '?'.
fn draw_glyph(img: &mut RgbImage, x: u32, y: u32, ch: char, scale: u32) {
    let glyph = BASIC_FONTS
        .get(ch)
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0u8; 8]);

    for (row, bits) in glyph.iter().enumerate() {
        for bit in 0..8u32 {
            if bits & (1 << bit) == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let px = x + bit * scale + sx;
                    let py = y + row as u32 * scale + sy;
                    if px < img.width() && py < img.height() {
                        img.put_pixel(px, py, BLACK);
                    }
                }
            }
        }
    }
}

fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32) {
    let mut cursor = x;
    for ch in text.chars() {
        draw_glyph(img, cursor, y, ch, scale);
        cursor += 8 * scale;
    }
}

/// Draw a line centered horizontally with its top edge at `y`.
fn draw_text_centered(img: &mut RgbImage, y: u32, text: &str, scale: u32) {
    let text_width = text.chars().count() as u32 * 8 * scale;
    let x = img.width().saturating_sub(text_width) / 2;
    draw_text(img, x, y, text, scale);
}

// ===========================================================================
// Tests
// ===========================================================================
