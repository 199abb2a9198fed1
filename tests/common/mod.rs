//! Synthetic in-memory footage shared by the integration tests.

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use killreel::{ColorMode, FrameSource, ReelError, Template};

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;
pub const ICON_SIZE: u32 = 12;
pub const ICON_POSITION: (u32, u32) = (44, 4);

/// A kill icon drawn on screen from `at` for `visible_for` seconds.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub at: f64,
    pub visible_for: f64,
    /// Icon opacity over the background, 0.0..=1.0.
    pub opacity: f32,
}

impl Marker {
    pub fn at(at: f64) -> Self {
        Self {
            at,
            visible_for: 0.5,
            opacity: 1.0,
        }
    }

    pub fn faded(at: f64, opacity: f32) -> Self {
        Self {
            opacity,
            ..Self::at(at)
        }
    }
}

/// Constant-rate footage of noise with markers pasted in.
pub struct SyntheticVideo {
    fps: f64,
    frame_count: u64,
    markers: Vec<Marker>,
    next: u64,
    decoded: u64,
    converted: u64,
}

impl SyntheticVideo {
    pub fn new(seconds: f64, fps: f64, markers: Vec<Marker>) -> Self {
        Self {
            fps,
            frame_count: (seconds * fps).round() as u64,
            markers,
            next: 0,
            decoded: 0,
            converted: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn current_time(&self) -> f64 {
        (self.next - 1) as f64 / self.fps
    }
}

impl FrameSource for SyntheticVideo {
    fn advance(&mut self) -> Result<Option<f64>, ReelError> {
        if self.next >= self.frame_count {
            return Ok(None);
        }
        self.next += 1;
        self.decoded += 1;
        Ok(Some(self.current_time()))
    }

    fn current_image(&mut self) -> Result<DynamicImage, ReelError> {
        self.converted += 1;
        let t = self.current_time();
        let mut frame = noise(FRAME_WIDTH, FRAME_HEIGHT, self.next as u32);

        let icon = icon();
        for marker in &self.markers {
            if t + 1e-9 >= marker.at && t < marker.at + marker.visible_for {
                blend(&mut frame, &icon, ICON_POSITION, marker.opacity);
            }
        }
        Ok(DynamicImage::ImageLuma8(frame))
    }
}

/// Deterministic noise in 64..192.
pub fn noise(width: u32, height: u32, seed: u32) -> GrayImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(12_345);
    GrayImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Luma([64 + (state % 128) as u8])
    })
}

/// High-contrast cross-hatched square.
pub fn icon() -> GrayImage {
    GrayImage::from_fn(ICON_SIZE, ICON_SIZE, |x, y| {
        let on_border = x == 0 || y == 0 || x == ICON_SIZE - 1 || y == ICON_SIZE - 1;
        let on_cross = x == y || x + y == ICON_SIZE - 1;
        if on_border || on_cross {
            Luma([250])
        } else {
            Luma([10])
        }
    })
}

pub fn icon_template() -> Template {
    Template::from_image(&DynamicImage::ImageLuma8(icon()), ColorMode::Grayscale)
        .expect("icon is not empty")
}

fn blend(frame: &mut GrayImage, icon: &GrayImage, at: (u32, u32), opacity: f32) {
    for (x, y, pixel) in icon.enumerate_pixels() {
        let target = frame.get_pixel_mut(at.0 + x, at.1 + y);
        let mixed = opacity * pixel[0] as f32 + (1.0 - opacity) * target[0] as f32;
        target[0] = mixed.round() as u8;
    }
}
