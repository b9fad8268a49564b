//! Image preprocessing for OCR
//!
//! Turns a scan window crop into a bitmap the OCR engine reads well. The
//! advanced tier runs the full filter chain on `imageproc`; every step has a
//! simpler fallback and a failed pass drops to the baseline tier, which only
//! converts to grayscale and stretches contrast.

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_line_segment_mut;
use imageproc::edges::canny;
use imageproc::filter::{box_filter, gaussian_blur_f32, median_filter};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::gradients::sobel_gradients;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use imageproc::morphology::erode;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::config::PreprocessingOptions;
use crate::error::ScanError;

/// Segmentation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Keep color, only denoise and tone-map
    ColorPreserving,
    /// Local mean threshold, robust to uneven lighting
    #[default]
    AdaptiveThreshold,
    /// Single global level, configured or Otsu
    FixedThreshold,
    /// Canny edges traced into contours, small contours dropped
    EdgeContours,
}

impl std::str::FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "color_preserving" | "color" => Ok(Technique::ColorPreserving),
            "adaptive_threshold" | "adaptive" => Ok(Technique::AdaptiveThreshold),
            "fixed_threshold" | "fixed" => Ok(Technique::FixedThreshold),
            "edge_contours" | "edges" => Ok(Technique::EdgeContours),
            other => Err(format!("unknown technique '{}'", other)),
        }
    }
}

/// Implementation tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessBackend {
    #[default]
    Advanced,
    Baseline,
}

/// Skew below this many degrees is left alone
const DESKEW_MIN_DEGREES: f32 = 1.0;
/// Lines further than this from horizontal/vertical are ignored for deskew
const DESKEW_MAX_DEGREES: f32 = 30.0;
/// Offset below the local mean that still counts as background
const ADAPTIVE_OFFSET: i32 = 7;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const SHARPEN_STRENGTH: f32 = 0.5;

/// Output of a preprocessing pass
#[derive(Debug, Clone)]
pub struct Processed {
    pub image: DynamicImage,
    /// Steps that fell back to a simpler variant
    pub degraded: Vec<ScanError>,
}

/// Turns crops into OCR-ready bitmaps
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor {
    backend: PreprocessBackend,
}

impl ImagePreprocessor {
    pub fn new(backend: PreprocessBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> PreprocessBackend {
        self.backend
    }

    /// Process a crop. Never fails: problems degrade to simpler steps.
    pub fn process(
        &self,
        image: &RgbaImage,
        options: &PreprocessingOptions,
        technique: Technique,
    ) -> DynamicImage {
        self.process_with_report(image, options, technique).image
    }

    /// Like [`ImagePreprocessor::process`], also reporting degraded steps
    pub fn process_with_report(
        &self,
        image: &RgbaImage,
        options: &PreprocessingOptions,
        technique: Technique,
    ) -> Processed {
        if self.backend == PreprocessBackend::Baseline {
            return Processed {
                image: DynamicImage::ImageLuma8(baseline(image, options)),
                degraded: Vec::new(),
            };
        }

        let mut pass = Pass::default();
        let result = catch_unwind(AssertUnwindSafe(|| pass.run(image, options, technique)));

        match result {
            Ok(Ok(image)) => Processed {
                image,
                degraded: pass.degraded,
            },
            Ok(Err(e)) => fall_back(image, options, pass.degraded, e.to_string()),
            Err(_) => fall_back(image, options, pass.degraded, "panic in filter chain".to_string()),
        }
    }
}

fn fall_back(
    image: &RgbaImage,
    options: &PreprocessingOptions,
    mut degraded: Vec<ScanError>,
    reason: String,
) -> Processed {
    let err = ScanError::PreprocessingDegraded {
        step: "pipeline",
        reason,
    };
    warn!("{}, using baseline", err);
    degraded.push(err);
    Processed {
        image: DynamicImage::ImageLuma8(baseline(image, options)),
        degraded,
    }
}

/// State of one advanced pass
#[derive(Default)]
struct Pass {
    degraded: Vec<ScanError>,
}

impl Pass {
    fn degrade(&mut self, step: &'static str, reason: impl Into<String>) {
        let err = ScanError::PreprocessingDegraded {
            step,
            reason: reason.into(),
        };
        warn!("{}", err);
        self.degraded.push(err);
    }

    fn run(
        &mut self,
        image: &RgbaImage,
        options: &PreprocessingOptions,
        technique: Technique,
    ) -> Result<DynamicImage, ScanError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(ScanError::InvalidFrame("empty crop".to_string()));
        }
        debug!(?technique, width = w, height = h, "Preprocessing crop");

        if technique == Technique::ColorPreserving {
            return Ok(DynamicImage::ImageRgba8(self.run_color(image, options)));
        }

        let gray = image::imageops::grayscale(image);
        let gray = self.denoise(gray, options.denoising_strength());
        let gray = apply_lut_gray(gray, &tone_lut(options));
        let gray = self.rotate(gray, options);

        let mut out = match technique {
            Technique::AdaptiveThreshold => adaptive_threshold(&gray, options.block_radius()),
            Technique::FixedThreshold => {
                let level = options.threshold().unwrap_or_else(|| otsu_level(&gray));
                binarize(&gray, level)
            }
            Technique::EdgeContours => self.edge_contours(&gray, options.min_contour_area()),
            Technique::ColorPreserving => gray,
        };

        if options.dilation_size() > 0 {
            // Dark strokes on white: eroding the white background thickens them
            out = erode(&out, Norm::LInf, options.dilation_size().min(255) as u8);
        }
        if options.sharpen() {
            out = sharpen_gray(&out, SHARPEN_STRENGTH);
        }
        if options.edge_enhance() {
            out = edge_enhance(&out);
        }
        if options.invert() {
            image::imageops::invert(&mut out);
        }

        Ok(DynamicImage::ImageLuma8(out))
    }

    fn run_color(&mut self, image: &RgbaImage, options: &PreprocessingOptions) -> RgbaImage {
        let radius = options.denoising_strength();
        let mut out = if radius == 0 {
            image.clone()
        } else if fits_window(image.dimensions(), radius) {
            median_filter(image, radius, radius)
        } else {
            self.degrade("median", "window larger than image");
            image.clone()
        };

        let lut = tone_lut(options);
        for pixel in out.pixels_mut() {
            for c in 0..3 {
                pixel[c] = lut[pixel[c] as usize];
            }
        }

        let angle = if options.auto_deskew() {
            let gray = image::imageops::grayscale(&out);
            match estimate_skew(&gray) {
                Some(skew) if skew.abs() > DESKEW_MIN_DEGREES => -skew,
                Some(_) => 0.0,
                None => {
                    self.degrade("deskew", "no lines found");
                    0.0
                }
            }
        } else {
            options.rotation_angle()
        };
        if angle.abs() > f32::EPSILON {
            out = rotate_about_center(
                &out,
                angle.to_radians(),
                Interpolation::Bilinear,
                Rgba([255, 255, 255, 255]),
            );
        }

        if options.sharpen() {
            let (w, h) = out.dimensions();
            let data = sharpen_channels(out.as_raw(), w, h, 4, SHARPEN_STRENGTH);
            out = RgbaImage::from_raw(w, h, data).unwrap_or(out);
        }
        if options.invert() {
            for pixel in out.pixels_mut() {
                for c in 0..3 {
                    pixel[c] = 255 - pixel[c];
                }
            }
        }
        out
    }

    fn denoise(&mut self, gray: GrayImage, radius: u32) -> GrayImage {
        if radius == 0 {
            return gray;
        }

        let filtered = if fits_window(gray.dimensions(), radius) {
            median_filter(&gray, radius, radius)
        } else {
            self.degrade("median", "window larger than image, using box blur");
            box_filter(&gray, 1, 1)
        };

        if radius >= 2 {
            gaussian_blur_f32(&filtered, 0.6)
        } else {
            filtered
        }
    }

    fn rotate(&mut self, gray: GrayImage, options: &PreprocessingOptions) -> GrayImage {
        let angle = if options.auto_deskew() {
            match estimate_skew(&gray) {
                Some(skew) if skew.abs() > DESKEW_MIN_DEGREES => {
                    debug!(skew, "Deskewing crop");
                    -skew
                }
                Some(_) => return gray,
                None => {
                    self.degrade("deskew", "no lines found");
                    return gray;
                }
            }
        } else {
            options.rotation_angle()
        };

        if angle.abs() <= f32::EPSILON {
            return gray;
        }
        rotate_about_center(&gray, angle.to_radians(), Interpolation::Bilinear, Luma([255]))
    }

    fn edge_contours(&mut self, gray: &GrayImage, min_area: f32) -> GrayImage {
        let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
        let contours = find_contours::<i32>(&edges);

        let (w, h) = gray.dimensions();
        let mut canvas = GrayImage::from_pixel(w, h, Luma([255]));
        let mut kept = 0;

        for contour in contours
            .iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer))
        {
            let points: Vec<(f32, f32)> = contour
                .points
                .iter()
                .map(|p| (p.x as f32, p.y as f32))
                .collect();
            if polygon_area(&points) < min_area {
                continue;
            }
            kept += 1;
            for (i, start) in points.iter().enumerate() {
                let end = points[(i + 1) % points.len()];
                draw_line_segment_mut(&mut canvas, *start, end, Luma([0]));
            }
        }

        if kept == 0 {
            self.degrade("contours", "no contour above minimum area, using Otsu threshold");
            return binarize(gray, otsu_level(gray));
        }
        debug!(contours = kept, "Contours redrawn");
        canvas
    }
}

fn fits_window((w, h): (u32, u32), radius: u32) -> bool {
    let window = 2 * radius + 1;
    w >= window && h >= window
}

/// 256-entry lookup combining contrast around mid-gray, brightness and gamma
pub fn tone_lut(options: &PreprocessingOptions) -> [u8; 256] {
    let contrast = options.contrast();
    let brightness = options.brightness();
    let inv_gamma = 1.0 / options.gamma().max(0.01);

    let mut lut = [0u8; 256];
    for (v, entry) in lut.iter_mut().enumerate() {
        let linear = ((v as f32 - 128.0) * contrast + 128.0 + brightness).clamp(0.0, 255.0);
        let corrected = 255.0 * (linear / 255.0).powf(inv_gamma);
        *entry = corrected.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut_gray(mut gray: GrayImage, lut: &[u8; 256]) -> GrayImage {
    for pixel in gray.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
    gray
}

/// Everything above `level` becomes white, the rest black
pub fn binarize(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}

/// Mean-of-neighbourhood threshold using a summed-area table
pub fn adaptive_threshold(gray: &GrayImage, block_radius: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let r = block_radius.max(1) as usize;

    // sums[(y + 1) * (w + 1) + (x + 1)] = sum of pixels in [0..=x] x [0..=y]
    let stride = wu + 1;
    let mut sums = vec![0u64; stride * (hu + 1)];
    for y in 0..hu {
        let mut row = 0u64;
        for x in 0..wu {
            row += u64::from(gray.get_pixel(x as u32, y as u32)[0]);
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..hu {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(hu);
        for x in 0..wu {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(wu);
            let area = ((x1 - x0) * (y1 - y0)) as u64;
            let total = sums[y1 * stride + x1] + sums[y0 * stride + x0]
                - sums[y0 * stride + x1]
                - sums[y1 * stride + x0];
            let mean = (total / area) as i32;

            let value = i32::from(gray.get_pixel(x as u32, y as u32)[0]);
            let white = value > mean - ADAPTIVE_OFFSET;
            out.put_pixel(x as u32, y as u32, Luma([if white { 255 } else { 0 }]));
        }
    }
    out
}

/// Dominant skew in degrees from near-horizontal/vertical lines, `None`
/// when no lines are found. Positive means the content is rotated clockwise.
pub fn estimate_skew(gray: &GrayImage) -> Option<f32> {
    let (w, h) = gray.dimensions();
    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let options = LineDetectionOptions {
        vote_threshold: (w.max(h) / 4).max(20),
        suppression_radius: 8,
    };

    let mut deviations: Vec<f32> = detect_lines(&edges, options)
        .iter()
        .map(|line| {
            // angle_in_degrees is the direction of the line normal
            let angle = line.angle_in_degrees as f32;
            if angle >= 45.0 && angle <= 135.0 {
                angle - 90.0
            } else if angle > 135.0 {
                angle - 180.0
            } else {
                angle
            }
        })
        .filter(|dev| dev.abs() <= DESKEW_MAX_DEGREES)
        .collect();

    if deviations.is_empty() {
        return None;
    }
    deviations.sort_by(|a, b| a.total_cmp(b));
    Some(deviations[deviations.len() / 2])
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[(f32, f32)]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f32 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|((x0, y0), (x1, y1))| x0 * y1 - x1 * y0)
        .sum();
    twice.abs() / 2.0
}

fn sharpen_gray(gray: &GrayImage, strength: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let data = sharpen_channels(gray.as_raw(), w, h, 1, strength);
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| gray.clone())
}

/// 3x3 sharpen: center weight 1 + 4s, direct neighbours -s. Border pixels
/// are left as they are.
fn sharpen_channels(
    data: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    strength: f32,
) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut result = data.to_vec();
    if w < 3 || h < 3 {
        return result;
    }

    let center_weight = 1.0 + 4.0 * strength;
    let neighbor_weight = -strength;
    let color_channels = channels.min(3);

    for y in 1..(h - 1) {
        for x in 1..(w - 1) {
            let idx = (y * w + x) * channels;
            for c in 0..color_channels {
                let top = data[((y - 1) * w + x) * channels + c] as f32;
                let bottom = data[((y + 1) * w + x) * channels + c] as f32;
                let left = data[(y * w + x - 1) * channels + c] as f32;
                let right = data[(y * w + x + 1) * channels + c] as f32;
                let center = data[idx + c] as f32;

                let sharpened = center * center_weight
                    + (top + bottom + left + right) * neighbor_weight;
                result[idx + c] = sharpened.clamp(0.0, 255.0) as u8;
            }
        }
    }
    result
}

/// Darken pixels in proportion to the local gradient
fn edge_enhance(gray: &GrayImage) -> GrayImage {
    let gradients = sobel_gradients(gray);
    let mut out = gray.clone();
    for (pixel, grad) in out.pixels_mut().zip(gradients.pixels()) {
        let edge = (grad[0].min(255) / 2) as u8;
        pixel[0] = pixel[0].saturating_sub(edge);
    }
    out
}

/// Grayscale plus min/max contrast stretch, no `imageproc` involved
pub fn baseline(image: &RgbaImage, options: &PreprocessingOptions) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (src, dst) in image.pixels().zip(gray.pixels_mut()) {
        let value = 0.299 * src[0] as f32 + 0.587 * src[1] as f32 + 0.114 * src[2] as f32;
        dst[0] = value.round().clamp(0.0, 255.0) as u8;
    }

    let (min, max) = gray
        .pixels()
        .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max > min {
        let range = f32::from(max - min);
        for pixel in gray.pixels_mut() {
            let stretched = f32::from(pixel[0] - min) * 255.0 / range;
            pixel[0] = stretched.round() as u8;
        }
    }

    if options.invert() {
        for pixel in gray.pixels_mut() {
            pixel[0] = 255 - pixel[0];
        }
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_technique_from_str() {
        assert_eq!("edge-contours".parse::<Technique>(), Ok(Technique::EdgeContours));
        assert_eq!("fixed".parse::<Technique>(), Ok(Technique::FixedThreshold));
        assert!("sepia".parse::<Technique>().is_err());
    }

    /// White card with a dark block in the middle
    fn card(w: u32, h: u32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([220, 220, 220, 255]));
        for y in h / 4..h * 3 / 4 {
            for x in w / 3..w * 2 / 3 {
                img.put_pixel(x, y, Rgba([30, 30, 30, 255]));
            }
        }
        img
    }

    fn is_binary(img: &DynamicImage) -> bool {
        img.to_luma8().pixels().all(|p| p[0] == 0 || p[0] == 255)
    }

    #[test]
    fn test_baseline_stretches_contrast() {
        let mut img = RgbaImage::from_pixel(4, 1, Rgba([100, 100, 100, 255]));
        img.put_pixel(3, 0, Rgba([150, 150, 150, 255]));

        let out = baseline(&img, &PreprocessingOptions::default());

        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(3, 0)[0], 255);
    }

    #[test]
    fn test_baseline_flat_image_unchanged() {
        let img = RgbaImage::from_pixel(3, 3, Rgba([90, 90, 90, 255]));
        let out = baseline(&img, &PreprocessingOptions::default());
        assert!(out.pixels().all(|p| p[0] == 90));
    }

    #[test]
    fn test_baseline_backend_skips_filters() {
        let pre = ImagePreprocessor::new(PreprocessBackend::Baseline);
        let processed = pre.process_with_report(
            &card(40, 20),
            &PreprocessingOptions::default(),
            Technique::EdgeContours,
        );
        assert!(processed.degraded.is_empty());
        assert!(matches!(processed.image, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn test_fixed_threshold_is_binary() {
        let mut options = PreprocessingOptions::default();
        options.set_threshold(Some(128));
        let pre = ImagePreprocessor::default();

        let out = pre.process(&card(60, 30), &options, Technique::FixedThreshold);

        assert!(is_binary(&out));
        let gray = out.to_luma8();
        assert_eq!(gray.get_pixel(30, 15)[0], 0);
        assert_eq!(gray.get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn test_otsu_threshold_separates_block() {
        let pre = ImagePreprocessor::default();
        let out = pre
            .process(&card(60, 30), &PreprocessingOptions::default(), Technique::FixedThreshold)
            .to_luma8();
        assert_eq!(out.get_pixel(30, 15)[0], 0);
        assert_eq!(out.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_adaptive_threshold_keeps_dark_edge() {
        let gray = image::imageops::grayscale(&card(60, 30));
        let out = adaptive_threshold(&gray, 5);

        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
        // Just inside the dark block, next to the bright background
        assert_eq!(out.get_pixel(20, 15)[0], 0);
        assert_eq!(out.get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn test_tone_lut_identity() {
        let mut options = PreprocessingOptions::default();
        options.set_contrast(1.0).set_brightness(0.0).set_gamma(1.0);
        let lut = tone_lut(&options);
        assert!(lut.iter().enumerate().all(|(i, v)| *v as usize == i));
    }

    #[test]
    fn test_tone_lut_contrast_pivots_on_mid_gray() {
        let mut options = PreprocessingOptions::default();
        options.set_contrast(2.0);
        let lut = tone_lut(&options);
        assert_eq!(lut[128], 128);
        assert_eq!(lut[100], 72);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[250], 255);
    }

    #[test]
    fn test_median_window_too_large_degrades() {
        let mut options = PreprocessingOptions::default();
        options.set_denoising_strength(5);
        let pre = ImagePreprocessor::default();

        let processed = pre.process_with_report(&card(6, 6), &options, Technique::FixedThreshold);

        assert!(processed
            .degraded
            .iter()
            .any(|e| matches!(e, ScanError::PreprocessingDegraded { step: "median", .. })));
        assert_eq!(processed.image.width(), 6);
    }

    #[test]
    fn test_deskew_without_lines_degrades() {
        let mut options = PreprocessingOptions::default();
        options.set_auto_deskew(true);
        let blank = RgbaImage::from_pixel(40, 20, Rgba([200, 200, 200, 255]));

        let processed = ImagePreprocessor::default().process_with_report(
            &blank,
            &options,
            Technique::AdaptiveThreshold,
        );

        assert!(processed
            .degraded
            .iter()
            .any(|e| matches!(e, ScanError::PreprocessingDegraded { step: "deskew", .. })));
    }

    #[test]
    fn test_edge_contours_blank_falls_back() {
        let blank = RgbaImage::from_pixel(40, 20, Rgba([255, 255, 255, 255]));
        let processed = ImagePreprocessor::default().process_with_report(
            &blank,
            &PreprocessingOptions::default(),
            Technique::EdgeContours,
        );
        assert!(processed
            .degraded
            .iter()
            .any(|e| matches!(e, ScanError::PreprocessingDegraded { step: "contours", .. })));
        assert!(is_binary(&processed.image));
    }

    #[test]
    fn test_edge_contours_redraws_block_outline() {
        let pre = ImagePreprocessor::default();
        let out = pre
            .process(&card(90, 60), &PreprocessingOptions::default(), Technique::EdgeContours)
            .to_luma8();
        // Outline drawn, background stays white
        assert!(out.pixels().any(|p| p[0] == 0));
        assert_eq!(out.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_color_preserving_keeps_rgba() {
        let pre = ImagePreprocessor::default();
        let out = pre.process(
            &card(30, 20),
            &PreprocessingOptions::default(),
            Technique::ColorPreserving,
        );
        assert!(matches!(out, DynamicImage::ImageRgba8(_)));
        assert_eq!((out.width(), out.height()), (30, 20));
    }

    #[test]
    fn test_invert_flips_output() {
        let mut options = PreprocessingOptions::default();
        options.set_threshold(Some(128)).set_invert(true);
        let out = ImagePreprocessor::default()
            .process(&card(60, 30), &options, Technique::FixedThreshold)
            .to_luma8();
        assert_eq!(out.get_pixel(30, 15)[0], 255);
        assert_eq!(out.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_empty_crop_falls_back_to_baseline() {
        let processed = ImagePreprocessor::default().process_with_report(
            &RgbaImage::new(0, 0),
            &PreprocessingOptions::default(),
            Technique::AdaptiveThreshold,
        );
        assert!(processed
            .degraded
            .iter()
            .any(|e| matches!(e, ScanError::PreprocessingDegraded { step: "pipeline", .. })));
    }

    #[test]
    fn test_processing_is_deterministic() {
        let pre = ImagePreprocessor::default();
        let mut options = PreprocessingOptions::default();
        options.set_sharpen(true).set_dilation_size(1).set_edge_enhance(true);
        let a = pre.process(&card(50, 30), &options, Technique::AdaptiveThreshold);
        let b = pre.process(&card(50, 30), &options, Technique::AdaptiveThreshold);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_level_lines_have_no_skew() {
        let mut gray = GrayImage::from_pixel(200, 100, Luma([255]));
        for band in [20u32, 50, 80] {
            for y in band..band + 6 {
                for x in 0..200 {
                    gray.put_pixel(x, y, Luma([0]));
                }
            }
        }
        let skew = estimate_skew(&gray).unwrap();
        assert!(skew.abs() <= DESKEW_MIN_DEGREES, "skew {skew}");
    }

    /// Dark horizontal bands rotated by `tilt` degrees about the centre
    fn tilted_bands(tilt: f32) -> GrayImage {
        let (w, h) = (240u32, 120u32);
        let slope = tilt.to_radians().tan();
        let mut gray = GrayImage::from_pixel(w, h, Luma([255]));
        for band in [30.0f32, 60.0, 90.0] {
            for x in 0..w {
                let centre = band + (x as f32 - w as f32 / 2.0) * slope;
                for dy in 0..6 {
                    let y = (centre + dy as f32).round();
                    if y >= 0.0 && (y as u32) < h {
                        gray.put_pixel(x, y as u32, Luma([0]));
                    }
                }
            }
        }
        gray
    }

    #[test]
    fn test_deskew_straightens_tilted_crop() {
        let mut options = PreprocessingOptions::default();
        options.set_auto_deskew(true);

        for tilt in [6.0f32, -6.0] {
            let gray = tilted_bands(tilt);
            let before = estimate_skew(&gray).unwrap();
            assert!(before.abs() >= 4.0, "tilt {tilt}: skew before {before}");

            let mut pass = Pass::default();
            let straightened = pass.rotate(gray, &options);
            assert!(pass.degraded.is_empty());

            let after = estimate_skew(&straightened).unwrap();
            assert!(after.abs() <= DESKEW_MIN_DEGREES, "tilt {tilt}: skew after {after}");
        }
    }

    #[test]
    fn test_polygon_area() {
        let square = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        assert!((polygon_area(&square) - 100.0).abs() < 0.001);
        assert_eq!(polygon_area(&[(0.0, 0.0), (1.0, 1.0)]), 0.0);
    }
}
