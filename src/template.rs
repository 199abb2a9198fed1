//! The reference icon searched for in every frame.
//!
//! A [`Template`] is loaded once per run and converted to the run's
//! [`ColorMode`]. For best results the icon should be cropped from a paused
//! frame of the footage itself, at the footage's native resolution: the
//! matcher is neither scale- nor rotation-invariant.

use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage};

use crate::config::ColorMode;
use crate::error::ReelError;

/// Template pixels in the run's colour mode.
#[derive(Debug, Clone)]
pub(crate) enum TemplatePixels {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// A fixed-scale reference image.
///
/// # Example
///
/// ```no_run
/// use killreel::{ColorMode, Template};
///
/// let template = Template::open("kill_icon.png", ColorMode::Grayscale)?;
/// println!("{}x{}", template.width(), template.height());
/// # Ok::<(), killreel::ReelError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) pixels: TemplatePixels,
    width: u32,
    height: u32,
}

impl Template {
    /// Load a template image from disk (PNG, JPEG, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::TemplateLoad`] if the file is missing, cannot be
    /// decoded, or has no pixels.
    pub fn open<P: AsRef<Path>>(path: P, mode: ColorMode) -> Result<Self, ReelError> {
        let path = path.as_ref();
        log::debug!("Loading template image: {}", path.display());

        let image = image::open(path).map_err(|error| ReelError::TemplateLoad {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        Self::from_image(&image, mode).map_err(|_| ReelError::TemplateLoad {
            path: path.to_path_buf(),
            reason: "image has no pixels".to_string(),
        })
    }

    /// Build a template from an in-memory image.
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::InvalidConfiguration`] for a zero-sized image.
    pub fn from_image(image: &DynamicImage, mode: ColorMode) -> Result<Self, ReelError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(ReelError::InvalidConfiguration(
                "template image has no pixels".to_string(),
            ));
        }

        let pixels = match mode {
            ColorMode::Grayscale => TemplatePixels::Gray(image.to_luma8()),
            ColorMode::Color => TemplatePixels::Rgb(image.to_rgb8()),
        };

        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Template width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Template height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Colour mode the template was converted to.
    pub fn color_mode(&self) -> ColorMode {
        match self.pixels {
            TemplatePixels::Gray(_) => ColorMode::Grayscale,
            TemplatePixels::Rgb(_) => ColorMode::Color,
        }
    }

    /// Raw interleaved samples.
    pub(crate) fn samples(&self) -> &[u8] {
        match &self.pixels {
            TemplatePixels::Gray(image) => image.as_raw(),
            TemplatePixels::Rgb(image) => image.as_raw(),
        }
    }
}
