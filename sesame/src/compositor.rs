use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::{DaemonError, DecodeError, Result};

/// Where the small image lands on the canvas.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    #[default]
    Center,
    // top-left corner, in canvas pixels
    At { x: u32, y: u32 },
}

impl Placement {
    /// Top-left corner for a `width`x`height` image on a square canvas.
    /// Errors if any part of the image would fall outside the canvas.
    pub fn offset(&self, canvas: u32, width: u32, height: u32) -> Result<(u32, u32)> {
        let size_error = |x, y| DaemonError::Size {
            width,
            height,
            canvas,
            x,
            y,
        };
        let (x, y) = match *self {
            Placement::Center => {
                if width > canvas || height > canvas {
                    return Err(size_error(0, 0));
                }
                ((canvas - width) / 2, (canvas - height) / 2)
            }
            Placement::At { x, y } => (x, y),
        };
        if x as u64 + width as u64 > canvas as u64 || y as u64 + height as u64 > canvas as u64 {
            return Err(size_error(x, y));
        }
        Ok((x, y))
    }
}

/// A finished environment texture. Shared, never mutated after composition.
#[derive(Clone)]
pub struct ComposedImage {
    pixels: Arc<RgbaImage>,
}

impl ComposedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    /// Row-major RGBA8 bytes.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.pixels.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

impl From<RgbaImage> for ComposedImage {
    fn from(img: RgbaImage) -> ComposedImage {
        ComposedImage { pixels: Arc::new(img) }
    }
}

impl PartialEq for ComposedImage {
    fn eq(&self, other: &ComposedImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
            || (self.width() == other.width() && self.height() == other.height() && self.as_raw() == other.as_raw())
    }
}

impl fmt::Debug for ComposedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComposedImage({}x{})", self.width(), self.height())
    }
}

/// Decodes `bytes` (png or jpeg), then paints it onto a `canvas_size`-square canvas
/// filled with `fill`. Same inputs always give byte-identical output.
pub fn compose(bytes: &[u8], placement: Placement, canvas_size: u32, fill: Rgba<u8>) -> Result<ComposedImage> {
    let small = image::load_from_memory(bytes)
        .map_err(DecodeError::Image)?
        .into_rgba8();
    let (x, y) = placement.offset(canvas_size, small.width(), small.height())?;

    let mut canvas = RgbaImage::from_pixel(canvas_size, canvas_size, fill);
    // straight copy, no alpha blending against the fill
    image::imageops::replace(&mut canvas, &small, x as i64, y as i64);
    Ok(ComposedImage::from(canvas))
}
