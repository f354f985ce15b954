//! Visible watermark layout.
//!
//! The engine only computes *where* text goes; drawing it into the PDF is
//! the renderer's job. Placements are centres of rotated text boxes in PDF
//! user space (points, origin bottom-left).

use serde::{Deserialize, Serialize};
use tracemark_types::WatermarkParams;
use tracing::debug;

use crate::error::MarkingError;

/// Minimum clear space between two tiled instances, in points.
pub const MIN_TILE_GAP: f64 = 24.0;

/// Average Helvetica advance width as a fraction of the font size. Slightly
/// generous so the estimated box always contains the rendered glyphs.
pub const AVG_GLYPH_WIDTH: f64 = 0.6;

/// Largest font size for a single centred instance.
pub const SINGLE_FONT_SIZE: f64 = 72.0;

/// Font size for tiled instances.
pub const TILE_FONT_SIZE: f64 = 28.0;

/// Size of a page's media box, in points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
}

impl PageGeometry {
    pub const A4: Self = Self {
        width: 595.0,
        height: 842.0,
    };
    pub const LETTER: Self = Self {
        width: 612.0,
        height: 792.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Centre point of one watermark instance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
}

/// Everything a renderer needs to draw the overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlaySpec {
    pub text: String,
    /// Fill alpha in `0.0..=1.0`; zero draws nothing visible.
    pub alpha: f64,
    /// Rotation in degrees, counter-clockwise.
    pub angle: f64,
    pub font_size: f64,
    /// Placements for each page, indexed like the page list (page 1 first).
    pub pages: Vec<Vec<Placement>>,
    /// Text written invisibly at the bottom-left of every page so that raw
    /// text extraction recovers it. Carries the recipient token.
    pub hidden_text: Option<String>,
}

impl OverlaySpec {
    /// Total number of visible instances across all pages.
    pub fn instance_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }
}

/// Width and height of the axis-aligned box around rotated text.
pub fn rotated_extent(text: &str, font_size: f64, angle: f64) -> (f64, f64) {
    let w = text.chars().count() as f64 * AVG_GLYPH_WIDTH * font_size;
    let h = font_size;
    let (sin, cos) = angle.to_radians().sin_cos();
    (
        (w * cos).abs() + (h * sin).abs(),
        (w * sin).abs() + (h * cos).abs(),
    )
}

/// Computes overlay layouts from watermark parameters and page geometry.
#[derive(Clone, Debug, Default)]
pub struct WatermarkEngine;

impl WatermarkEngine {
    pub fn new() -> Self {
        Self
    }

    /// Plan the overlay for a document.
    ///
    /// When `token` is given it is carried as hidden text, and appended to
    /// the visible text as well if `token_in_text` is set.
    pub fn plan(
        &self,
        pages: &[PageGeometry],
        params: &WatermarkParams,
        token: Option<&str>,
        token_in_text: bool,
    ) -> Result<OverlaySpec, MarkingError> {
        if pages.is_empty() {
            return Err(MarkingError::NoPages);
        }
        for (index, page) in pages.iter().enumerate() {
            if !page.is_usable() {
                return Err(MarkingError::InvalidGeometry {
                    page: index + 1,
                    width: page.width,
                    height: page.height,
                });
            }
        }

        let text = match token {
            Some(t) if token_in_text => format!("{} {t}", params.text),
            _ => params.text.clone(),
        };
        let angle = f64::from(params.angle);
        let smallest = pages
            .iter()
            .fold((f64::MAX, f64::MAX), |(w, h), p| (w.min(p.width), h.min(p.height)));

        let font_size = if params.tile {
            fit_font_size(&text, angle, smallest.0, smallest.1, TILE_FONT_SIZE)
        } else {
            fit_font_size(&text, angle, smallest.0 * 0.9, smallest.1 * 0.9, SINGLE_FONT_SIZE)
        };

        let placements = pages
            .iter()
            .map(|page| {
                if params.tile {
                    tile(page, &text, font_size, angle)
                } else {
                    vec![Placement {
                        x: page.width / 2.0,
                        y: page.height / 2.0,
                    }]
                }
            })
            .collect();

        let spec = OverlaySpec {
            text,
            alpha: f64::from(params.opacity) / 100.0,
            angle,
            font_size,
            pages: placements,
            hidden_text: token.map(str::to_string),
        };
        debug!(
            pages = pages.len(),
            instances = spec.instance_count(),
            font_size = spec.font_size,
            tiled = params.tile,
            "watermark planned"
        );
        Ok(spec)
    }
}

/// Largest font size up to `max` whose rotated box fits in `width`x`height`.
fn fit_font_size(text: &str, angle: f64, width: f64, height: f64, max: f64) -> f64 {
    let (unit_w, unit_h) = rotated_extent(text, 1.0, angle);
    let fit_w = if unit_w > 0.0 { width / unit_w } else { max };
    let fit_h = if unit_h > 0.0 { height / unit_h } else { max };
    max.min(fit_w).min(fit_h).max(1.0)
}

/// Grid of centres whose rotated boxes are separated by at least
/// [`MIN_TILE_GAP`] in both directions.
fn tile(page: &PageGeometry, text: &str, font_size: f64, angle: f64) -> Vec<Placement> {
    let (bw, bh) = rotated_extent(text, font_size, angle);
    let cell_w = bw + MIN_TILE_GAP;
    let cell_h = bh + MIN_TILE_GAP;
    let cols = ((page.width / cell_w).floor() as usize).max(1);
    let rows = ((page.height / cell_h).floor() as usize).max(1);
    let x0 = (page.width - cols as f64 * cell_w) / 2.0 + cell_w / 2.0;
    let y0 = (page.height - rows as f64 * cell_h) / 2.0 + cell_h / 2.0;

    let mut out = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        for col in 0..cols {
            out.push(Placement {
                x: x0 + col as f64 * cell_w,
                y: y0 + row as f64 * cell_h,
            });
        }
    }
    out
}
