//! Page geometry: where to clip a source page and how to map the clip onto
//! the label canvas.
//!
//! Pure arithmetic, no I/O. The canvas is fixed per request; the clip is
//! computed per page from that page's own box, so documents mixing page sizes
//! are handled page by page.
//!
//! ## Clip policy
//!
//! The clip starts at `width / 2 - margin_mm * MM_TO_POINTS` and runs to the
//! right edge of the page over the full height. A start outside
//! `[0, width)` is rejected with [`LabelError::Geometry`] rather than clamped:
//! the caller picked a margin that does not fit the page and has to resubmit.
//!
//! ## Rotated pages
//!
//! Width, height and the clip are measured on the page as a viewer shows it,
//! after `/Rotate`. [`PageTransform::clip_bbox`] maps the clip back into the
//! page's unrotated user space and [`PageTransform::matrix`] carries the
//! rotation, so the strip that is on the right when the page is viewed is the
//! one that fills the canvas, upright.

use crate::error::LabelError;
use serde::{Deserialize, Serialize};

/// Millimetre to PostScript point conversion factor.
pub const MM_TO_POINTS: f64 = 2.83465;

/// Convert a signed margin in millimetres to points.
pub fn margin_points(margin_mm: f64) -> f64 {
    margin_mm * MM_TO_POINTS
}

/// Fixed-size output page, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSpec {
    pub width_points: f64,
    pub height_points: f64,
}

impl CanvasSpec {
    pub fn from_inches(width_inches: f64, height_inches: f64, points_per_inch: u32) -> Self {
        let ppi = f64::from(points_per_inch);
        Self {
            width_points: width_inches * ppi,
            height_points: height_inches * ppi,
        }
    }
}

/// Clockwise display rotation of a page, from its `/Rotate` entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Normalise a `/Rotate` value. Anything that is not a multiple of 90
    /// is treated as unrotated.
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Cw90,
            180 => Rotation::Cw180,
            270 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Visible box of a source page in default user space.
///
/// `x`/`y` are the lower-left corner; PDF boxes need not start at the origin.
/// `width`/`height` are unrotated; see [`PageBox::displayed_size`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: Rotation,
}

impl PageBox {
    /// Unrotated box anchored at the origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            rotation: Rotation::None,
        }
    }

    /// Normalise a `[x0 y0 x1 y1]` rectangle whose corners may be swapped.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
            rotation: Rotation::None,
        }
    }

    pub fn with_rotation(self, rotation: Rotation) -> Self {
        Self { rotation, ..self }
    }

    /// `(width, height)` as displayed, after rotation.
    pub fn displayed_size(&self) -> (f64, f64) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Clip rectangle on the displayed page, relative to its lower-left corner:
/// `(x0, y0)` – `(x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl ClipRect {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Result of the geometry stage for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub page_box: PageBox,
    pub clip: ClipRect,
    pub canvas: CanvasSpec,
}

impl PageTransform {
    /// Clip rectangle in absolute unrotated user space, as
    /// `[llx, lly, urx, ury]`. This is the region a Form XObject of the page
    /// has to keep.
    pub fn clip_bbox(&self) -> [f64; 4] {
        let PageBox {
            x,
            y,
            width: w,
            height: h,
            rotation,
        } = self.page_box;
        let ClipRect { x0, y0, x1, y1 } = self.clip;
        let [u0, v0, u1, v1] = match rotation {
            Rotation::None => [x0, y0, x1, y1],
            Rotation::Cw90 => [w - y1, x0, w - y0, x1],
            Rotation::Cw180 => [w - x1, h - y1, w - x0, h - y0],
            Rotation::Cw270 => [y0, h - x1, y1, h - x0],
        };
        [x + u0, y + v0, x + u1, y + v1]
    }

    /// Affine matrix `[a b c d e f]` that maps the clip onto the full canvas,
    /// turning rotated pages upright on the way.
    ///
    /// Scale-to-fill: x and y scale independently.
    pub fn matrix(&self) -> [f64; 6] {
        let PageBox {
            x: bx,
            y: by,
            width: w,
            height: h,
            rotation,
        } = self.page_box;
        let ClipRect { x0, y0, .. } = self.clip;
        let sx = self.canvas.width_points / self.clip.width();
        let sy = self.canvas.height_points / self.clip.height();
        match rotation {
            Rotation::None => [sx, 0.0, 0.0, sy, -sx * (bx + x0), -sy * (by + y0)],
            Rotation::Cw90 => [0.0, -sy, sx, 0.0, -sx * (by + x0), sy * (w + bx - y0)],
            Rotation::Cw180 => [-sx, 0.0, 0.0, -sy, sx * (w + bx - x0), sy * (h + by - y0)],
            Rotation::Cw270 => [0.0, sy, -sx, 0.0, sx * (h + by - x0), -sy * (bx + y0)],
        }
    }
}

/// Compute the clip and canvas mapping for one page.
///
/// `page` is 1-based and only used for error reporting. The reported page
/// width is the displayed one.
pub fn page_transform(
    page: usize,
    page_box: PageBox,
    margin_mm: f64,
    canvas: CanvasSpec,
) -> Result<PageTransform, LabelError> {
    let (width, height) = page_box.displayed_size();
    let clip_start_x = width / 2.0 - margin_points(margin_mm);

    let in_range = width.is_finite()
        && height.is_finite()
        && width > 0.0
        && height > 0.0
        && clip_start_x.is_finite()
        && clip_start_x >= 0.0
        && clip_start_x < width;
    if !in_range {
        return Err(LabelError::Geometry {
            page,
            clip_start_x,
            page_width: width,
        });
    }

    Ok(PageTransform {
        page_box,
        clip: ClipRect {
            x0: clip_start_x,
            y0: 0.0,
            x1: width,
            y1: height,
        },
        canvas,
    })
}
