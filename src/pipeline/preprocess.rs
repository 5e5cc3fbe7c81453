//! Chainable preprocessing of a single page image.
//!
//! A [`Preprocessor`] owns one working image. Each step method builds its
//! result from [`ImageTransforms`] primitives and replaces the working image
//! only when every primitive succeeded. A failing step is logged and skipped,
//! so a page always comes out with all the steps that *could* be applied.
//!
//! ```ignore
//! let out = Preprocessor::open("scan.png", transforms)?
//!     .deskew(10.0)
//!     .denoise(1)
//!     .binarize(128)
//!     .enhance_contrast(2.0)
//!     .save("out.png")?;
//! ```

use super::transform::{check_target_size, ImageTransforms};
use crate::error::{ScanPrepError, TransformError};
use crate::steps::{
    PipelineStep, DEFAULT_BINARIZE_THRESHOLD, DEFAULT_BORDER_FUZZ_PERCENT, DEFAULT_DENOISE_LEVEL,
    DEFAULT_ENHANCE_FACTOR, DEFAULT_MAX_SKEW_DEGREES, DEFAULT_RESIZE_SCALE,
    DEFAULT_SHARPEN_RADIUS, DEFAULT_SHARPEN_SIGMA,
};
use image::{DynamicImage, GenericImageView, ImageReader, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Fraction of full intensity below which a pixel counts as ink for skew
/// detection.
const SKEW_INK_FRACTION: f32 = 0.4;
/// Angles smaller than this are left alone.
const MIN_SKEW_CORRECTION: f32 = 0.1;

/// A page image plus the transforms used to process it.
pub struct Preprocessor {
    image: DynamicImage,
    transforms: Arc<dyn ImageTransforms>,
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("color", &self.image.color())
            .finish()
    }
}

impl Preprocessor {
    // ── Construction ─────────────────────────────────────────────────────

    /// Load an image file. The format is detected from content, so the
    /// extension does not matter.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        transforms: Arc<dyn ImageTransforms>,
    ) -> Result<Self, ScanPrepError> {
        let path = path.as_ref();
        let load_err = |detail: String| ScanPrepError::ImageLoadFailed {
            path: path.to_path_buf(),
            detail,
        };
        let image = ImageReader::open(path)
            .map_err(|e| load_err(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| load_err(e.to_string()))?
            .decode()
            .map_err(|e| load_err(e.to_string()))?;
        debug!(
            width = image.width(),
            height = image.height(),
            color = ?image.color(),
            "Image loaded"
        );
        Ok(Self::from_dynamic(image, transforms))
    }

    /// Wrap an already-decoded image.
    pub fn from_dynamic(image: DynamicImage, transforms: Arc<dyn ImageTransforms>) -> Self {
        Self {
            image: to_working_format(image),
            transforms,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    // ── Steps ────────────────────────────────────────────────────────────

    /// Run one pipeline step, filling in defaults for missing parameters.
    pub fn apply_step(&mut self, step: &PipelineStep) -> &mut Self {
        match *step {
            PipelineStep::Deskew => self.deskew(DEFAULT_MAX_SKEW_DEGREES),
            PipelineStep::Denoise(level) => self.denoise(level.unwrap_or(DEFAULT_DENOISE_LEVEL)),
            PipelineStep::Binarize(threshold) => {
                self.binarize(threshold.unwrap_or(DEFAULT_BINARIZE_THRESHOLD))
            }
            PipelineStep::EnhanceContrast(factor) => {
                self.enhance_contrast(factor.unwrap_or(DEFAULT_ENHANCE_FACTOR))
            }
            PipelineStep::Resize(scale) => self.resize(scale.unwrap_or(DEFAULT_RESIZE_SCALE)),
            PipelineStep::Sharpen { radius, sigma } => self.sharpen(
                radius.unwrap_or(DEFAULT_SHARPEN_RADIUS),
                sigma.unwrap_or(DEFAULT_SHARPEN_SIGMA),
            ),
            PipelineStep::RemoveBorders(fuzz) => {
                self.remove_borders(fuzz.unwrap_or(DEFAULT_BORDER_FUZZ_PERCENT))
            }
        }
    }

    /// Straighten text lines tilted by no more than `max_angle` degrees.
    ///
    /// The angle is measured on a grayscale copy; the correction is applied
    /// to the working image. Larger angles are left alone, since they are
    /// more likely a misdetection than a real skew.
    pub fn deskew(&mut self, max_angle: f32) -> &mut Self {
        self.apply("deskew", |t, image| {
            let gray = t.grayscale(image)?;
            let ink_threshold = (SKEW_INK_FRACTION * 255.0).round() as u8;
            let Some(angle) = t.estimate_skew(&gray, ink_threshold)? else {
                debug!("Not enough content to measure skew");
                return Ok(None);
            };
            if angle.abs() < MIN_SKEW_CORRECTION || angle.abs() > max_angle {
                debug!(angle, max_angle, "Skew outside correction range; unchanged");
                return Ok(None);
            }
            info!(angle, "Correcting skew");
            t.rotate(image, -angle).map(Some)
        })
    }

    /// Remove noise. `level` is clamped to 1..=3:
    /// 1 = one despeckle pass, 2 = two passes, 3 = stronger smoothing.
    pub fn denoise(&mut self, level: i32) -> &mut Self {
        let level = level.clamp(1, 3);
        self.apply("denoise", move |t, image| {
            let out = match level {
                1 => t.despeckle(image)?,
                2 => t.despeckle(&t.despeckle(image)?)?,
                _ => t.enhance(&t.add_noise(image, 1.0)?)?,
            };
            Ok(Some(out))
        })
    }

    /// Convert to grayscale then to pure black and white at `threshold`
    /// (clamped to 0..=255).
    pub fn binarize(&mut self, threshold: i32) -> &mut Self {
        let level = threshold.clamp(0, 255) as u8;
        self.apply("binarize", move |t, image| {
            let gray = t.grayscale(image)?;
            t.threshold(&gray, level).map(Some)
        })
    }

    /// Normalise, apply a mild contrast boost, and when `factor` > 1 add a
    /// sigmoidal contrast of that strength.
    pub fn enhance_contrast(&mut self, factor: f32) -> &mut Self {
        self.apply("enhance", move |t, image| {
            let mut out = t.contrast(&t.normalize(image)?, true)?;
            if factor > 1.0 {
                out = t.sigmoidal_contrast(&out, factor, 0.5)?;
            }
            Ok(Some(out))
        })
    }

    /// Scale both dimensions by `scale`.
    pub fn resize(&mut self, scale: f32) -> &mut Self {
        self.apply("resize", move |t, image| {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(TransformError::InvalidParameter {
                    step: "resize",
                    detail: format!("scale must be positive, got {scale}"),
                });
            }
            let (w, h) = image.dimensions();
            let width = (w as f64 * scale as f64).round();
            let height = (h as f64 * scale as f64).round();
            check_target_size(width, height)?;
            t.resize(image, width as u32, height as u32).map(Some)
        })
    }

    pub fn sharpen(&mut self, radius: f32, sigma: f32) -> &mut Self {
        self.apply("sharpen", move |t, image| t.sharpen(image, radius, sigma).map(Some))
    }

    /// Crop a uniform border. `fuzz_percent` is the colour tolerance as a
    /// percentage of the intensity range.
    pub fn remove_borders(&mut self, fuzz_percent: f32) -> &mut Self {
        self.apply("remove_borders", move |t, image| {
            t.trim(image, fuzz_percent / 100.0).map(Some)
        })
    }

    // ── Output ───────────────────────────────────────────────────────────

    /// Write the working image; the format follows the extension of `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, ScanPrepError> {
        let path = path.as_ref();
        self.image
            .save(path)
            .map_err(|e| ScanPrepError::PersistenceFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        debug!(path = %path.display(), "Processed image saved");
        Ok(path.to_path_buf())
    }

    /// Run `op` against the working image. `Ok(Some(_))` replaces it,
    /// `Ok(None)` means nothing to do, `Err(_)` is logged and ignored.
    fn apply<F>(&mut self, step: &'static str, op: F) -> &mut Self
    where
        F: FnOnce(&dyn ImageTransforms, &DynamicImage) -> Result<Option<DynamicImage>, TransformError>,
    {
        match op(self.transforms.as_ref(), &self.image) {
            Ok(Some(image)) => {
                debug!(step, width = image.width(), height = image.height(), "Step applied");
                self.image = image;
            }
            Ok(None) => {}
            Err(e) => error!(step, error = %e, "Step failed; keeping previous image"),
        }
        self
    }
}

/// Bring a decoded image into one of the two working layouts: 8-bit luma for
/// grayscale sources, 8-bit RGB otherwise. Transparency is flattened onto
/// white, which is what a scanner would have seen behind the page.
fn to_working_format(image: DynamicImage) -> DynamicImage {
    let grayscale = !image.color().has_color();
    let flattened = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        let mut rgb = RgbImage::new(rgba.width(), rgba.height());
        for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
            let [r, g, b, a] = src.0;
            let blend = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32)) / 255) as u8;
            *dst = Rgb([blend(r), blend(g), blend(b)]);
        }
        DynamicImage::ImageRgb8(rgb)
    } else {
        image
    };
    match (grayscale, flattened) {
        (true, DynamicImage::ImageLuma8(buf)) => DynamicImage::ImageLuma8(buf),
        (true, other) => DynamicImage::ImageLuma8(other.to_luma8()),
        (false, DynamicImage::ImageRgb8(buf)) => DynamicImage::ImageRgb8(buf),
        (false, other) => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
