//! Normalized cross-correlation template matching.
//!
//! [`TemplateMatcher`] slides the template over every valid position of a
//! frame and reports the best correlation coefficient, the score OpenCV
//! calls `TM_CCOEFF_NORMED`:
//!
//! ```text
//! R(x, y) = Σ T'·I' / sqrt(Σ T'² · Σ I'²)
//! ```
//!
//! where `T'` is the template and `I'` the frame window under it, each with
//! its per-channel mean removed. Following Lewis' fast normalized
//! cross-correlation, the cross term `Σ T'·I` for every alignment comes from
//! one FFT correlation over the searched area, and the window energies from
//! integral images. A frame costs `O(W·H·log(W·H))` whatever the template
//! size.

use std::{borrow::Cow, sync::Arc};

use image::{DynamicImage, GrayImage, RgbImage};
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::config::{ColorMode, SearchRegion};
use crate::error::MatchError;
use crate::template::Template;

/// Best alignment of the template in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    /// Correlation coefficient in `[-1.0, 1.0]`.
    pub score: f32,
    /// Top-left corner of the best alignment, in frame pixels.
    pub location: (u32, u32),
}

/// Matches one template against successive frames.
///
/// Template statistics are computed once in [`new`](TemplateMatcher::new);
/// [`best_match`](TemplateMatcher::best_match) is then called per frame.
pub struct TemplateMatcher<'t> {
    template: &'t Template,
    /// Template samples minus their channel mean, interleaved.
    centered: Vec<f64>,
    /// `Σ T'²` over all channels.
    template_energy: f64,
    region: Option<SearchRegion>,
}

impl<'t> TemplateMatcher<'t> {
    /// Prepare a matcher for `template`, optionally restricted to `region`.
    pub fn new(template: &'t Template, region: Option<SearchRegion>) -> Self {
        let channels = template.color_mode().channels();
        let samples = template.samples();
        let pixel_count = (template.width() * template.height()) as f64;

        let mut means = [0.0_f64; 3];
        for (index, &value) in samples.iter().enumerate() {
            means[index % channels] += value as f64;
        }
        for mean in means.iter_mut().take(channels) {
            *mean /= pixel_count;
        }

        let centered: Vec<f64> = samples
            .iter()
            .enumerate()
            .map(|(index, &value)| value as f64 - means[index % channels])
            .collect();
        let template_energy = centered.iter().map(|&v| v * v).sum();

        Self {
            template,
            centered,
            template_energy,
            region,
        }
    }

    /// Find the best alignment of the template inside `frame`.
    ///
    /// Frames in the other colour mode are converted first.
    ///
    /// # Errors
    ///
    /// [`MatchError::TemplateTooLarge`] if the template does not fit in the
    /// searched area, [`MatchError::EmptyFrame`] if there is nothing to
    /// search.
    pub fn best_match(&self, frame: &DynamicImage) -> Result<MatchScore, MatchError> {
        match self.template.color_mode() {
            ColorMode::Grayscale => {
                let gray: Cow<'_, GrayImage> = match frame {
                    DynamicImage::ImageLuma8(image) => Cow::Borrowed(image),
                    other => Cow::Owned(other.to_luma8()),
                };
                self.search(gray.as_raw(), gray.width(), gray.height())
            }
            ColorMode::Color => {
                let rgb: Cow<'_, RgbImage> = match frame {
                    DynamicImage::ImageRgb8(image) => Cow::Borrowed(image),
                    other => Cow::Owned(other.to_rgb8()),
                };
                self.search(rgb.as_raw(), rgb.width(), rgb.height())
            }
        }
    }

    fn search(
        &self,
        samples: &[u8],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<MatchScore, MatchError> {
        if frame_width == 0 || frame_height == 0 {
            return Err(MatchError::EmptyFrame);
        }

        let area = match self.region {
            Some(region) => region
                .clip_to(frame_width, frame_height)
                .ok_or(MatchError::EmptyFrame)?,
            None => SearchRegion::new(0, 0, frame_width, frame_height),
        };

        let (template_width, template_height) = (self.template.width(), self.template.height());
        if template_width > area.width || template_height > area.height {
            return Err(MatchError::TemplateTooLarge {
                template_width,
                template_height,
                frame_width: area.width,
                frame_height: area.height,
            });
        }

        let channels = self.template.color_mode().channels();
        let view = FrameView {
            samples,
            stride: frame_width as usize * channels,
            channels,
            origin_x: area.x as usize,
            origin_y: area.y as usize,
            width: area.width as usize,
            height: area.height as usize,
        };
        let integrals = Integrals::build(&view);

        let tw = template_width as usize;
        let th = template_height as usize;
        let pixel_count = (tw * th) as f64;
        let cross_terms = self.cross_terms(&view, &integrals);

        let mut best = MatchScore {
            score: f32::NEG_INFINITY,
            location: (area.x, area.y),
        };

        for y in 0..=(view.height - th) {
            for x in 0..=(view.width - tw) {
                let mut window_energy = 0.0_f64;
                for channel in 0..channels {
                    let (sum, sum_sq) = integrals.window(channel, x, y, tw, th);
                    window_energy += (sum_sq - sum * sum / pixel_count).max(0.0);
                }

                let score = correlation(cross_terms.at(x, y), self.template_energy, window_energy);
                if score > best.score {
                    best = MatchScore {
                        score,
                        location: ((view.origin_x + x) as u32, (view.origin_y + y) as u32),
                    };
                }
            }
        }

        Ok(best)
    }

    /// `Σ T'·I` at every alignment inside `view`, summed over channels.
    ///
    /// Each channel of the view (mean removed, zero padded) and of the
    /// centered template is transformed once; the spectra are multiplied,
    /// summed and transformed back. Padding to at least the view size keeps
    /// every valid alignment free of wrap-around.
    fn cross_terms(&self, view: &FrameView<'_>, integrals: &Integrals) -> CrossTerms {
        let plan = SpectralPlan::new(fft_length(view.width), fft_length(view.height));
        let tw = self.template.width() as usize;
        let th = self.template.height() as usize;
        let area = (view.width * view.height) as f64;
        let zero = Complex::new(0.0, 0.0);

        let mut product = vec![zero; plan.len()];
        for channel in 0..view.channels {
            // Σ T' = 0, so any constant offset leaves the cross term unchanged.
            let mean = integrals.window(channel, 0, 0, view.width, view.height).0 / area;

            let mut image = vec![zero; plan.len()];
            for y in 0..view.height {
                for x in 0..view.width {
                    let value = view.sample(x, y, channel) - mean;
                    image[y * plan.width + x] = Complex::new(value, 0.0);
                }
            }

            let mut pattern = vec![zero; plan.len()];
            for y in 0..th {
                for x in 0..tw {
                    let value = self.centered[(y * tw + x) * view.channels + channel];
                    pattern[y * plan.width + x] = Complex::new(value, 0.0);
                }
            }

            let image = plan.forward(image);
            let pattern = plan.forward(pattern);
            for ((sum, i), t) in product.iter_mut().zip(&image).zip(&pattern) {
                *sum += *i * t.conj();
            }
        }

        CrossTerms {
            values: plan.inverse(product),
            stride: plan.width,
        }
    }
}

/// Below this, `Σ (v - mean)²` of 8-bit samples can only be rounding
/// noise: the smallest non-zero value for integers is 1/2.
const FLAT_ENERGY: f64 = 0.25;

/// Turn the cross term into a coefficient, treating flat inputs as 0.
fn correlation(cross: f64, template_energy: f64, window_energy: f64) -> f32 {
    if template_energy < FLAT_ENERGY || window_energy < FLAT_ENERGY {
        return 0.0;
    }
    let ratio = cross / (template_energy * window_energy).sqrt();
    if ratio.abs() <= 1.0 {
        ratio as f32
    } else if ratio.abs() < 1.125 {
        // Rounding noise just past ±1.
        ratio.signum() as f32
    } else {
        0.0
    }
}

/// Real part of an inverse FFT correlation, row-major with padded rows.
struct CrossTerms {
    values: Vec<f64>,
    stride: usize,
}

impl CrossTerms {
    fn at(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.stride + x]
    }
}

/// Forward and inverse 2-D transforms of one padded size.
///
/// Rows are transformed in place, then the grid is transposed so columns
/// can be transformed as rows. Spectra stay in that transposed layout,
/// which is fine for element-wise products.
struct SpectralPlan {
    width: usize,
    height: usize,
    rows: Arc<dyn Fft<f64>>,
    columns: Arc<dyn Fft<f64>>,
    inverse_rows: Arc<dyn Fft<f64>>,
    inverse_columns: Arc<dyn Fft<f64>>,
}

impl SpectralPlan {
    fn new(width: usize, height: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            width,
            height,
            rows: planner.plan_fft_forward(width),
            columns: planner.plan_fft_forward(height),
            inverse_rows: planner.plan_fft_inverse(width),
            inverse_columns: planner.plan_fft_inverse(height),
        }
    }

    fn len(&self) -> usize {
        self.width * self.height
    }

    /// Row-major grid in, transposed spectrum out.
    fn forward(&self, mut grid: Vec<Complex<f64>>) -> Vec<Complex<f64>> {
        self.rows.process(&mut grid);
        let mut spectrum = transpose(&grid, self.width, self.height);
        self.columns.process(&mut spectrum);
        spectrum
    }

    /// Transposed spectrum in, normalized real row-major grid out.
    fn inverse(&self, mut spectrum: Vec<Complex<f64>>) -> Vec<f64> {
        self.inverse_columns.process(&mut spectrum);
        let mut grid = transpose(&spectrum, self.height, self.width);
        self.inverse_rows.process(&mut grid);
        let scale = 1.0 / self.len() as f64;
        grid.into_iter().map(|value| value.re * scale).collect()
    }
}

/// Transpose `height` rows of `width` values.
fn transpose(data: &[Complex<f64>], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut transposed = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            transposed[x * height + y] = data[y * width + x];
        }
    }
    transposed
}

/// Smallest length `>= n` with no prime factor above 5.
fn fft_length(n: usize) -> usize {
    (n.max(1)..)
        .find(|&candidate| {
            let mut rest = candidate;
            for factor in [2, 3, 5] {
                while rest % factor == 0 {
                    rest /= factor;
                }
            }
            rest == 1
        })
        .unwrap_or(n)
}

/// Borrowed rectangle of an interleaved 8-bit frame.
struct FrameView<'a> {
    samples: &'a [u8],
    stride: usize,
    channels: usize,
    origin_x: usize,
    origin_y: usize,
    width: usize,
    height: usize,
}

impl FrameView<'_> {
    fn sample(&self, x: usize, y: usize, channel: usize) -> f64 {
        let at = (self.origin_y + y) * self.stride + (self.origin_x + x) * self.channels + channel;
        self.samples[at] as f64
    }
}

/// Per-channel summed-area tables of values and squared values.
struct Integrals {
    sums: Vec<f64>,
    squares: Vec<f64>,
    width: usize,
    height: usize,
}

impl Integrals {
    fn build(view: &FrameView<'_>) -> Self {
        let width = view.width + 1;
        let height = view.height + 1;
        let plane = width * height;
        let mut sums = vec![0.0; plane * view.channels];
        let mut squares = vec![0.0; plane * view.channels];

        for channel in 0..view.channels {
            let base = channel * plane;
            for y in 0..view.height {
                let mut row_sum = 0.0;
                let mut row_square = 0.0;
                for x in 0..view.width {
                    let value = view.sample(x, y, channel);
                    row_sum += value;
                    row_square += value * value;
                    let above = base + y * width + x + 1;
                    let here = base + (y + 1) * width + x + 1;
                    sums[here] = sums[above] + row_sum;
                    squares[here] = squares[above] + row_square;
                }
            }
        }

        Self {
            sums,
            squares,
            width,
            height,
        }
    }

    /// `(Σ v, Σ v²)` of channel `channel` over a `w` x `h` window at `(x, y)`.
    fn window(&self, channel: usize, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let base = channel * self.width * self.height;
        let at = |table: &[f64], cx: usize, cy: usize| table[base + cy * self.width + cx];
        let rect = |table: &[f64]| {
            at(table, x + w, y + h) - at(table, x, y + h) - at(table, x + w, y) + at(table, x, y)
        };
        (rect(&self.sums), rect(&self.squares))
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    /// Deterministic, non-repeating texture.
    fn noise(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(73) ^ y.wrapping_mul(151) ^ seed.wrapping_mul(29);
            Luma([(v.wrapping_mul(2_654_435_761) >> 24) as u8])
        })
    }

    fn paste(frame: &mut GrayImage, patch: &GrayImage, at_x: u32, at_y: u32) {
        for (x, y, pixel) in patch.enumerate_pixels() {
            frame.put_pixel(at_x + x, at_y + y, *pixel);
        }
    }

    #[test]
    fn finds_exact_copy_with_unit_score() {
        let icon = noise(8, 6, 7);
        let mut frame = noise(40, 30, 1);
        paste(&mut frame, &icon, 21, 13);

        let template =
            Template::from_image(&DynamicImage::ImageLuma8(icon), ColorMode::Grayscale).unwrap();
        let matcher = TemplateMatcher::new(&template, None);
        let found = matcher
            .best_match(&DynamicImage::ImageLuma8(frame))
            .unwrap();

        assert_eq!(found.location, (21, 13));
        assert!(found.score > 0.999, "score was {}", found.score);
    }

    #[test]
    fn score_is_invariant_to_brightness_and_contrast() {
        let icon = noise(6, 6, 3);
        let brightened = GrayImage::from_fn(6, 6, |x, y| {
            Luma([(icon.get_pixel(x, y)[0] / 2).saturating_add(60)])
        });
        let mut frame = noise(30, 30, 9);
        paste(&mut frame, &brightened, 4, 17);

        let template =
            Template::from_image(&DynamicImage::ImageLuma8(icon), ColorMode::Grayscale).unwrap();
        let found = TemplateMatcher::new(&template, None)
            .best_match(&DynamicImage::ImageLuma8(frame))
            .unwrap();

        assert_eq!(found.location, (4, 17));
        assert!(found.score > 0.99, "score was {}", found.score);
    }

    #[test]
    fn flat_template_scores_zero() {
        let icon = GrayImage::from_pixel(4, 4, Luma([200]));
        let template =
            Template::from_image(&DynamicImage::ImageLuma8(icon), ColorMode::Grayscale).unwrap();
        let found = TemplateMatcher::new(&template, None)
            .best_match(&DynamicImage::ImageLuma8(noise(20, 20, 5)))
            .unwrap();

        assert_eq!(found.score, 0.0);
    }

    #[test]
    fn template_larger_than_frame_is_an_error() {
        let template = Template::from_image(
            &DynamicImage::ImageLuma8(noise(32, 8, 1)),
            ColorMode::Grayscale,
        )
        .unwrap();
        let result = TemplateMatcher::new(&template, None)
            .best_match(&DynamicImage::ImageLuma8(noise(16, 16, 2)));

        assert!(matches!(result, Err(MatchError::TemplateTooLarge { .. })));
    }

    #[test]
    fn region_limits_search_and_keeps_frame_coordinates() {
        let icon = noise(5, 5, 11);
        let mut frame = noise(50, 50, 4);
        paste(&mut frame, &icon, 2, 2);
        paste(&mut frame, &icon, 40, 35);

        let template =
            Template::from_image(&DynamicImage::ImageLuma8(icon), ColorMode::Grayscale).unwrap();
        let matcher = TemplateMatcher::new(&template, Some(SearchRegion::new(30, 30, 20, 20)));
        let found = matcher
            .best_match(&DynamicImage::ImageLuma8(frame))
            .unwrap();

        assert_eq!(found.location, (40, 35));
    }

    #[test]
    fn region_too_small_for_template_is_an_error() {
        let template = Template::from_image(
            &DynamicImage::ImageLuma8(noise(10, 10, 1)),
            ColorMode::Grayscale,
        )
        .unwrap();
        let matcher = TemplateMatcher::new(&template, Some(SearchRegion::new(45, 45, 20, 20)));
        let result = matcher.best_match(&DynamicImage::ImageLuma8(noise(50, 50, 2)));

        assert!(matches!(result, Err(MatchError::TemplateTooLarge { .. })));
    }

    #[test]
    fn color_mode_distinguishes_hue() {
        let red = RgbImage::from_fn(6, 6, |x, y| {
            if (x + y) % 2 == 0 { Rgb([220, 20, 20]) } else { Rgb([20, 20, 20]) }
        });
        let blue = RgbImage::from_fn(6, 6, |x, y| {
            if (x + y) % 2 == 0 { Rgb([20, 20, 220]) } else { Rgb([20, 20, 20]) }
        });
        let mut frame = RgbImage::from_pixel(30, 20, Rgb([20, 20, 20]));
        for (x, y, pixel) in blue.enumerate_pixels() {
            frame.put_pixel(3 + x, 3 + y, *pixel);
        }
        for (x, y, pixel) in red.enumerate_pixels() {
            frame.put_pixel(20 + x, 10 + y, *pixel);
        }

        let template =
            Template::from_image(&DynamicImage::ImageRgb8(red), ColorMode::Color).unwrap();
        let found = TemplateMatcher::new(&template, None)
            .best_match(&DynamicImage::ImageRgb8(frame))
            .unwrap();

        assert_eq!(found.location, (20, 10));
        assert!(found.score > 0.99);
    }

    /// Direct `Σ T'·I` at one alignment.
    fn direct_cross(
        matcher: &TemplateMatcher<'_>,
        view: &FrameView<'_>,
        x: usize,
        y: usize,
    ) -> f64 {
        let tw = matcher.template.width() as usize;
        let th = matcher.template.height() as usize;
        let mut cross = 0.0;
        for ty in 0..th {
            for tx in 0..tw {
                for channel in 0..view.channels {
                    let t = matcher.centered[(ty * tw + tx) * view.channels + channel];
                    cross += t * view.sample(x + tx, y + ty, channel);
                }
            }
        }
        cross
    }

    #[test]
    fn spectral_cross_terms_agree_with_direct_sums() {
        let icon = DynamicImage::ImageLuma8(noise(7, 5, 21)).to_rgb8();
        let frame = DynamicImage::ImageLuma8(noise(37, 23, 3)).to_rgb8();
        let template =
            Template::from_image(&DynamicImage::ImageRgb8(icon), ColorMode::Color).unwrap();
        let matcher = TemplateMatcher::new(&template, None);

        // Odd offsets and sizes exercise padding and the region origin.
        let view = FrameView {
            samples: frame.as_raw(),
            stride: 37 * 3,
            channels: 3,
            origin_x: 3,
            origin_y: 2,
            width: 31,
            height: 19,
        };
        let integrals = Integrals::build(&view);
        let spectral = matcher.cross_terms(&view, &integrals);

        for y in 0..=(19 - 5) {
            for x in 0..=(31 - 7) {
                let direct = direct_cross(&matcher, &view, x, y);
                let fast = spectral.at(x, y);
                assert!(
                    (direct - fast).abs() < 1e-6 * direct.abs().max(1.0),
                    "({x}, {y}): {direct} vs {fast}"
                );
            }
        }
    }

    #[test]
    fn fft_lengths_only_have_small_factors() {
        assert_eq!(fft_length(1), 1);
        assert_eq!(fft_length(7), 8);
        assert_eq!(fft_length(31), 32);
        assert_eq!(fft_length(720), 720);
        assert_eq!(fft_length(1081), 1125);
    }

    #[test]
    fn rgb_frame_is_converted_for_grayscale_template() {
        let icon = noise(6, 4, 8);
        let mut frame = noise(24, 24, 6);
        paste(&mut frame, &icon, 10, 5);
        let rgb_frame = DynamicImage::ImageLuma8(frame).to_rgb8();

        let template =
            Template::from_image(&DynamicImage::ImageLuma8(icon), ColorMode::Grayscale).unwrap();
        let found = TemplateMatcher::new(&template, None)
            .best_match(&DynamicImage::ImageRgb8(rgb_frame))
            .unwrap();

        assert_eq!(found.location, (10, 5));
    }
}
