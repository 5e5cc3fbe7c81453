//! Primitive image operations behind a trait.
//!
//! [`ImageTransforms`] is the seam between the pipeline and the pixel work:
//! the [`Preprocessor`](super::preprocess::Preprocessor) composes these
//! primitives into steps, and tests swap in wrappers that record which
//! primitives ran. [`StandardTransforms`] is the production implementation on
//! top of `image` and `imageproc`.
//!
//! All operations take the image by reference and return a new one; a failure
//! leaves the caller's image untouched.
//!
//! ## Working formats
//!
//! The preprocessor keeps images as 8-bit `Luma` or `Rgb` (alpha is flattened
//! onto white on load). Operations accept any `DynamicImage` but other
//! layouts are converted to `Rgb8` first.

use crate::error::TransformError;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::noise::gaussian_noise;

/// The image primitives the preprocessing steps are built from.
pub trait ImageTransforms: Send + Sync {
    /// Convert to single-channel 8-bit luma.
    fn grayscale(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError>;

    /// Estimate text skew in degrees. Positive means text lines descend to
    /// the right. Pixels with luma below `ink_threshold` count as ink.
    ///
    /// `Ok(None)` when the image has too little ink to decide.
    fn estimate_skew(
        &self,
        image: &DynamicImage,
        ink_threshold: u8,
    ) -> Result<Option<f32>, TransformError>;

    /// Rotate clockwise by `degrees`, growing the canvas to fit and filling
    /// uncovered area with white.
    fn rotate(&self, image: &DynamicImage, degrees: f32) -> Result<DynamicImage, TransformError>;

    /// Remove isolated speckles (3×3 median).
    fn despeckle(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError>;

    /// Add seeded gaussian noise, scaled by `attenuate`.
    fn add_noise(&self, image: &DynamicImage, attenuate: f32)
        -> Result<DynamicImage, TransformError>;

    /// Noise-reducing smooth (5×5 median).
    fn enhance(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError>;

    /// Two-level image: luma above `level` becomes white, everything else black.
    fn threshold(&self, image: &DynamicImage, level: u8) -> Result<DynamicImage, TransformError>;

    /// Stretch the histogram so the darkest 2% map to black and the brightest
    /// 1% to white.
    fn normalize(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError>;

    /// Mild linear contrast change around mid-grey: up when `sharpen`,
    /// down otherwise.
    fn contrast(&self, image: &DynamicImage, sharpen: bool)
        -> Result<DynamicImage, TransformError>;

    /// Sigmoidal contrast of the given `strength` centred on `midpoint`
    /// (0.0–1.0 of the intensity range).
    fn sigmoidal_contrast(
        &self,
        image: &DynamicImage,
        strength: f32,
        midpoint: f32,
    ) -> Result<DynamicImage, TransformError>;

    /// Resample to exactly `width` × `height` with a Lanczos filter.
    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, TransformError>;

    /// Unsharp mask. `radius` of 0 lets `sigma` alone decide the kernel.
    fn sharpen(
        &self,
        image: &DynamicImage,
        radius: f32,
        sigma: f32,
    ) -> Result<DynamicImage, TransformError>;

    /// Crop away the border whose colour matches the top-left pixel within
    /// `fuzz` (0.0–1.0 of the intensity range).
    fn trim(&self, image: &DynamicImage, fuzz: f32) -> Result<DynamicImage, TransformError>;
}

// ── Tuning ───────────────────────────────────────────────────────────────

/// Standard deviation (intensity levels) of the noise added at attenuate 1.0.
const NOISE_STDDEV: f64 = 8.0;
/// Fixed seed so the same input always gives the same output.
const NOISE_SEED: u64 = 0x5CA9_0001;

/// Largest side a resize may produce. The longest edge of an A3 page at
/// 600 DPI is about 10,000 px.
pub const MAX_TARGET_SIDE: u32 = 20_000;
/// Largest pixel count a resize may produce (roughly 400 MB as RGB8).
pub const MAX_TARGET_PIXELS: u64 = 128_000_000;
/// Largest unsharp-mask sigma; the blur kernel grows linearly with it.
pub const MAX_SHARPEN_SIGMA: f32 = 64.0;

/// Linear contrast step applied by [`ImageTransforms::contrast`].
const CONTRAST_STEP: f32 = 1.15;

/// Skew search: images are downscaled so the longest side is at most this.
const SKEW_MAX_SIDE: u32 = 800;
/// Skew search range, degrees either side of level.
const SKEW_SEARCH_RANGE: f32 = 15.0;
const SKEW_COARSE_STEP: f32 = 0.5;
const SKEW_FINE_STEP: f32 = 0.1;
/// Fewer ink pixels than this and the estimate is meaningless.
const SKEW_MIN_INK: usize = 64;
/// Cap on ink samples fed to the projection search.
const SKEW_MAX_SAMPLES: usize = 200_000;

/// Applies `$body` to the concrete 8-bit buffer inside `$image`, binding it
/// to `$buf`, and wraps the result back into the same `DynamicImage` variant.
macro_rules! map_buffer {
    ($image:expr, |$buf:ident| $body:expr) => {
        match $image {
            DynamicImage::ImageLuma8($buf) => DynamicImage::ImageLuma8($body),
            DynamicImage::ImageRgb8($buf) => DynamicImage::ImageRgb8($body),
            other => {
                let $buf = &other.to_rgb8();
                DynamicImage::ImageRgb8($body)
            }
        }
    };
}

/// Production [`ImageTransforms`] on `image` + `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTransforms;

impl StandardTransforms {
    pub fn new() -> Self {
        Self
    }
}

impl ImageTransforms for StandardTransforms {
    fn grayscale(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        Ok(DynamicImage::ImageLuma8(image.to_luma8()))
    }

    fn estimate_skew(
        &self,
        image: &DynamicImage,
        ink_threshold: u8,
    ) -> Result<Option<f32>, TransformError> {
        let gray = downscale_for_analysis(image.to_luma8());
        let ink = collect_ink(&gray, ink_threshold);
        if ink.len() < SKEW_MIN_INK {
            return Ok(None);
        }
        let span = (gray.width() + gray.height()) as f32;

        // Coarse pass over the whole range, then refine around the winner.
        let coarse_steps = (SKEW_SEARCH_RANGE / SKEW_COARSE_STEP).round() as i32;
        let coarse = best_angle(
            &ink,
            span,
            (-coarse_steps..=coarse_steps).map(|i| i as f32 * SKEW_COARSE_STEP),
        );
        let fine_steps = (SKEW_COARSE_STEP / SKEW_FINE_STEP).round() as i32;
        let fine = best_angle(
            &ink,
            span,
            (-fine_steps..=fine_steps).map(|i| coarse + i as f32 * SKEW_FINE_STEP),
        );
        Ok(Some(fine))
    }

    fn rotate(&self, image: &DynamicImage, degrees: f32) -> Result<DynamicImage, TransformError> {
        if !degrees.is_finite() {
            return Err(TransformError::InvalidParameter {
                step: "rotate",
                detail: format!("angle must be finite, got {degrees}"),
            });
        }
        let (width, height) = image.dimensions();
        let (projection, out_w, out_h) = rotation_projection(width, height, degrees)?;
        let rotated = match image {
            DynamicImage::ImageLuma8(buf) => {
                let mut out = GrayImage::new(out_w, out_h);
                warp_into(buf, &projection, Interpolation::Bilinear, Luma([255u8]), &mut out);
                DynamicImage::ImageLuma8(out)
            }
            other => {
                let rgb = other.to_rgb8();
                let mut out = RgbImage::new(out_w, out_h);
                warp_into(&rgb, &projection, Interpolation::Bilinear, Rgb([255u8; 3]), &mut out);
                DynamicImage::ImageRgb8(out)
            }
        };
        Ok(rotated)
    }

    fn despeckle(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        Ok(map_buffer!(image, |buf| median_filter(buf, 1, 1)))
    }

    fn add_noise(
        &self,
        image: &DynamicImage,
        attenuate: f32,
    ) -> Result<DynamicImage, TransformError> {
        if !attenuate.is_finite() || attenuate < 0.0 {
            return Err(TransformError::InvalidParameter {
                step: "noise",
                detail: format!("attenuate must be a non-negative number, got {attenuate}"),
            });
        }
        let stddev = NOISE_STDDEV * attenuate as f64;
        Ok(map_buffer!(image, |buf| gaussian_noise(buf, 0.0, stddev, NOISE_SEED)))
    }

    fn enhance(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        Ok(map_buffer!(image, |buf| median_filter(buf, 2, 2)))
    }

    fn threshold(&self, image: &DynamicImage, level: u8) -> Result<DynamicImage, TransformError> {
        let mut gray = image.to_luma8();
        for p in gray.pixels_mut() {
            p.0[0] = if p.0[0] > level { 255 } else { 0 };
        }
        Ok(DynamicImage::ImageLuma8(gray))
    }

    fn normalize(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        let histogram = luma_histogram(image);
        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return Ok(image.clone());
        }
        let low = percentile(&histogram, total, 0.02);
        let high = percentile(&histogram, total, 0.99);
        if high <= low {
            // Flat image; nothing to stretch.
            return Ok(image.clone());
        }
        let range = (high - low) as f32;
        let lut = build_lut(|c| (c as f32 - low as f32) * 255.0 / range);
        Ok(map_buffer!(image, |buf| apply_lut(buf, &lut)))
    }

    fn contrast(
        &self,
        image: &DynamicImage,
        sharpen: bool,
    ) -> Result<DynamicImage, TransformError> {
        let factor = if sharpen { CONTRAST_STEP } else { 1.0 / CONTRAST_STEP };
        let lut = build_lut(|c| factor * (c as f32 - 128.0) + 128.0);
        Ok(map_buffer!(image, |buf| apply_lut(buf, &lut)))
    }

    fn sigmoidal_contrast(
        &self,
        image: &DynamicImage,
        strength: f32,
        midpoint: f32,
    ) -> Result<DynamicImage, TransformError> {
        if !strength.is_finite() || strength <= 0.0 {
            return Err(TransformError::InvalidParameter {
                step: "sigmoidal_contrast",
                detail: format!("strength must be positive, got {strength}"),
            });
        }
        if !(0.0..=1.0).contains(&midpoint) {
            return Err(TransformError::InvalidParameter {
                step: "sigmoidal_contrast",
                detail: format!("midpoint must be within 0.0-1.0, got {midpoint}"),
            });
        }
        let lut = build_lut(|c| sigmoidal(c as f32 / 255.0, strength, midpoint) * 255.0);
        Ok(map_buffer!(image, |buf| apply_lut(buf, &lut)))
    }

    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, TransformError> {
        check_target_size(width as f64, height as f64)?;
        Ok(image.resize_exact(width, height, FilterType::Lanczos3))
    }

    fn sharpen(
        &self,
        image: &DynamicImage,
        radius: f32,
        sigma: f32,
    ) -> Result<DynamicImage, TransformError> {
        if !sigma.is_finite() || sigma <= 0.0 || sigma > MAX_SHARPEN_SIGMA {
            return Err(TransformError::InvalidParameter {
                step: "sharpen",
                detail: format!("sigma must be within (0, {MAX_SHARPEN_SIGMA}], got {sigma}"),
            });
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(TransformError::InvalidParameter {
                step: "sharpen",
                detail: format!("radius must be non-negative, got {radius}"),
            });
        }
        // A fixed radius bounds how wide the blur may spread.
        let sigma = if radius > 0.0 { sigma.min(radius) } else { sigma };
        Ok(image.unsharpen(sigma, 0))
    }

    fn trim(&self, image: &DynamicImage, fuzz: f32) -> Result<DynamicImage, TransformError> {
        if !(0.0..=1.0).contains(&fuzz) {
            return Err(TransformError::InvalidParameter {
                step: "trim",
                detail: format!("fuzz must be within 0.0-1.0, got {fuzz}"),
            });
        }
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(TransformError::NothingToTrim);
        }
        let border = *rgb.get_pixel(0, 0);
        let tolerance = fuzz * 255.0;

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in rgb.enumerate_pixels() {
            let distance = p
                .channels()
                .iter()
                .zip(border.channels())
                .map(|(a, b)| (*a as f32 - *b as f32).abs())
                .fold(0.0f32, f32::max);
            if distance > tolerance {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }

        let (x0, y0, x1, y1) = bounds.ok_or(TransformError::NothingToTrim)?;
        Ok(image.crop_imm(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Reject a resize target that is empty or too large to allocate. Takes
/// `f64` so callers can check a scaled size before casting it to `u32`.
pub fn check_target_size(width: f64, height: f64) -> Result<(), TransformError> {
    let invalid = |detail: String| TransformError::InvalidParameter {
        step: "resize",
        detail,
    };
    if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 {
        return Err(invalid(format!("target size {width}x{height} is empty")));
    }
    let max_side = MAX_TARGET_SIDE as f64;
    if width > max_side || height > max_side {
        return Err(invalid(format!(
            "target size {width}x{height} exceeds {MAX_TARGET_SIDE} px per side"
        )));
    }
    if width * height > MAX_TARGET_PIXELS as f64 {
        return Err(invalid(format!(
            "target size {width}x{height} exceeds {MAX_TARGET_PIXELS} pixels"
        )));
    }
    Ok(())
}

fn downscale_for_analysis(gray: GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= SKEW_MAX_SIDE {
        return gray;
    }
    let scale = SKEW_MAX_SIDE as f32 / longest as f32;
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);
    image::imageops::resize(&gray, nw, nh, FilterType::Triangle)
}

fn collect_ink(gray: &GrayImage, ink_threshold: u8) -> Vec<(f32, f32)> {
    let ink_count = gray.pixels().filter(|p| p.0[0] < ink_threshold).count();
    let stride = ink_count.div_ceil(SKEW_MAX_SAMPLES).max(1);
    gray.enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] < ink_threshold)
        .step_by(stride)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect()
}

/// Score an angle by how sharply the ink projects onto lines at that angle:
/// the sum of squared bin counts peaks when rows of text line up.
fn projection_score(ink: &[(f32, f32)], span: f32, degrees: f32) -> f64 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let mut bins = vec![0u32; (2.0 * span) as usize + 2];
    for &(x, y) in ink {
        let r = y * cos - x * sin + span;
        if let Some(bin) = bins.get_mut(r.max(0.0) as usize) {
            *bin += 1;
        }
    }
    bins.iter().map(|&c| (c as f64) * (c as f64)).sum()
}

fn best_angle(ink: &[(f32, f32)], span: f32, candidates: impl Iterator<Item = f32>) -> f32 {
    let mut best = (0.0f32, f64::MIN);
    for angle in candidates {
        let score = projection_score(ink, span, angle);
        // Ties go to the angle closest to level.
        if score > best.1 || (score == best.1 && angle.abs() < best.0.abs()) {
            best = (angle, score);
        }
    }
    best.0
}

/// Projection rotating a `width`×`height` image clockwise by `degrees` about
/// its centre into a canvas large enough to hold every corner.
fn rotation_projection(
    width: u32,
    height: u32,
    degrees: f32,
) -> Result<(Projection, u32, u32), TransformError> {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (w, h) = (width as f32, height as f32);
    let out_w = (w * cos.abs() + h * sin.abs()).ceil().max(1.0);
    let out_h = (w * sin.abs() + h * cos.abs()).ceil().max(1.0);

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ox, oy) = (out_w / 2.0, out_h / 2.0);
    let place = |(x, y): (f32, f32)| {
        let (dx, dy) = (x - cx, y - cy);
        (dx * cos - dy * sin + ox, dx * sin + dy * cos + oy)
    };

    let src = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let dest = src.map(place);
    let projection =
        Projection::from_control_points(src, dest).ok_or_else(|| TransformError::Failed {
            step: "rotate",
            detail: format!("degenerate rotation for {width}x{height} image"),
        })?;
    Ok((projection, out_w as u32, out_h as u32))
}

fn luma_histogram(image: &DynamicImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    match image {
        DynamicImage::ImageLuma8(buf) => {
            for p in buf.pixels() {
                histogram[p.0[0] as usize] += 1;
            }
        }
        other => {
            for p in other.to_luma8().pixels() {
                histogram[p.0[0] as usize] += 1;
            }
        }
    }
    histogram
}

/// Smallest level at which the cumulative count reaches `fraction` of `total`.
fn percentile(histogram: &[u64; 256], total: u64, fraction: f64) -> u8 {
    let target = (total as f64 * fraction).ceil() as u64;
    let mut cumulative = 0u64;
    for (level, count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target.max(1) {
            return level as u8;
        }
    }
    255
}

/// Normalised logistic curve: maps 0 → 0 and 1 → 1 with slope set by
/// `strength` around `midpoint`.
fn sigmoidal(u: f32, strength: f32, midpoint: f32) -> f32 {
    let logistic = |x: f32| 1.0 / (1.0 + (-x).exp());
    let lo = logistic(-strength * midpoint);
    let hi = logistic(strength * (1.0 - midpoint));
    (logistic(strength * (u - midpoint)) - lo) / (hi - lo)
}

fn build_lut(f: impl Fn(u8) -> f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = f(i as u8).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut<P>(buf: &ImageBuffer<P, Vec<u8>>, lut: &[u8; 256]) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = buf.clone();
    for p in out.pixels_mut() {
        p.apply(|c| lut[c as usize]);
    }
    out
}
