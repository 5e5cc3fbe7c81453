//! Pipeline step model.
//!
//! A [`PipelineSpec`] is an ordered list of [`PipelineStep`]s. Every HTTP
//! route and the CLI build one, then hand it to [`crate::process`]; nothing
//! downstream knows which route a request came from.
//!
//! Parameters are carried as `Option`s so that "not given" survives until the
//! step runs and picks its own default (see the `DEFAULT_*` constants).

use serde_json::Value;
use tracing::warn;

// ── Defaults ─────────────────────────────────────────────────────────────

/// Largest skew (degrees) deskew will correct.
pub const DEFAULT_MAX_SKEW_DEGREES: f32 = 10.0;
pub const DEFAULT_DENOISE_LEVEL: i32 = 1;
pub const DEFAULT_BINARIZE_THRESHOLD: i32 = 128;
pub const DEFAULT_ENHANCE_FACTOR: f32 = 2.0;
pub const DEFAULT_RESIZE_SCALE: f32 = 2.0;
pub const DEFAULT_SHARPEN_RADIUS: f32 = 0.0;
pub const DEFAULT_SHARPEN_SIGMA: f32 = 1.0;
/// Border colour tolerance, percent of the intensity range.
pub const DEFAULT_BORDER_FUZZ_PERCENT: f32 = 10.0;

/// Enhancement factor used by the OCR-optimised preset.
pub const OCR_ENHANCE_FACTOR: f32 = 1.5;
/// Denoise level used by the OCR-optimised preset.
pub const OCR_DENOISE_LEVEL: i32 = 1;

// ── Steps ────────────────────────────────────────────────────────────────

/// One image operation with its (optional) parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineStep {
    Deskew,
    /// Denoise level, clamped to 1..=3 when applied.
    Denoise(Option<i32>),
    /// Threshold on the 0..=255 scale, clamped when applied.
    Binarize(Option<i32>),
    /// Sigmoidal contrast strength; ≤ 1 means normalise only.
    EnhanceContrast(Option<f32>),
    /// Uniform scale factor.
    Resize(Option<f32>),
    Sharpen {
        radius: Option<f32>,
        sigma: Option<f32>,
    },
    /// Fuzz tolerance in percent.
    RemoveBorders(Option<f32>),
}

impl PipelineStep {
    /// The name used in logs and in the `steps` form field.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::Deskew => "deskew",
            PipelineStep::Denoise(_) => "denoise",
            PipelineStep::Binarize(_) => "binarize",
            PipelineStep::EnhanceContrast(_) => "enhance",
            PipelineStep::Resize(_) => "resize",
            PipelineStep::Sharpen { .. } => "sharpen",
            PipelineStep::RemoveBorders(_) => "remove_borders",
        }
    }

    /// Build a step from its form name, taking parameters from `params`.
    ///
    /// Names are matched case-insensitively after trimming. Returns `None`
    /// for names that are not recognised.
    pub fn from_name(name: &str, params: &StepParams) -> Option<Self> {
        let step = match name.trim().to_ascii_lowercase().as_str() {
            "deskew" => PipelineStep::Deskew,
            "denoise" => PipelineStep::Denoise(params.denoise_level),
            "binarize" => PipelineStep::Binarize(params.binarize_threshold),
            "enhance" | "enhance_contrast" => PipelineStep::EnhanceContrast(params.enhance_factor),
            "resize" => PipelineStep::Resize(params.resize_scale),
            "sharpen" => PipelineStep::Sharpen {
                radius: params.sharpen_radius,
                sigma: params.sharpen_sigma,
            },
            "remove_borders" => PipelineStep::RemoveBorders(params.border_fuzz),
            _ => return None,
        };
        Some(step)
    }
}

// ── Spec ─────────────────────────────────────────────────────────────────

/// Ordered list of steps to run on every page.
///
/// An empty spec is valid and means "the default pipeline"; use
/// [`PipelineSpec::resolved`] to get the steps that will actually run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSpec {
    steps: Vec<PipelineStep>,
}

impl PipelineSpec {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// A spec holding exactly one step.
    pub fn single(step: PipelineStep) -> Self {
        Self { steps: vec![step] }
    }

    /// Deskew → Denoise(1) → Binarize(128) → EnhanceContrast(2.0).
    pub fn default_pipeline() -> Self {
        Self::new(vec![
            PipelineStep::Deskew,
            PipelineStep::Denoise(Some(DEFAULT_DENOISE_LEVEL)),
            PipelineStep::Binarize(Some(DEFAULT_BINARIZE_THRESHOLD)),
            PipelineStep::EnhanceContrast(Some(DEFAULT_ENHANCE_FACTOR)),
        ])
    }

    /// Deskew → EnhanceContrast(factor) → Denoise(level).
    ///
    /// Tuned for cloud OCR engines, which do their own binarisation.
    pub fn ocr_optimized(enhance_factor: f32, denoise_level: i32) -> Self {
        Self::new(vec![
            PipelineStep::Deskew,
            PipelineStep::EnhanceContrast(Some(enhance_factor)),
            PipelineStep::Denoise(Some(denoise_level)),
        ])
    }

    /// Build a spec from step names as they arrive in the `steps` form field.
    ///
    /// Unknown names are logged and skipped. If nothing recognisable is left,
    /// the result is empty and therefore resolves to the default pipeline.
    pub fn from_named_steps<S: AsRef<str>>(names: &[S], params: &StepParams) -> Self {
        let steps = names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                let step = PipelineStep::from_name(name, params);
                if step.is_none() {
                    warn!(step = name, "Unknown pipeline step ignored");
                }
                step
            })
            .collect();
        Self { steps }
    }

    /// Append a step.
    pub fn then(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The steps that will run: this spec's, or the default pipeline's when
    /// empty.
    pub fn resolved(&self) -> Vec<PipelineStep> {
        if self.steps.is_empty() {
            Self::default_pipeline().steps
        } else {
            self.steps.clone()
        }
    }

    /// Comma-separated step names, for logging.
    pub fn describe(&self) -> String {
        self.resolved()
            .iter()
            .map(PipelineStep::name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Params ───────────────────────────────────────────────────────────────

/// Step parameters from the `/pipeline` route's `params` JSON object.
///
/// Parsing is lenient: malformed JSON yields no parameters, and a key whose
/// value has the wrong type is ignored so that the step falls back to its
/// default. Numeric strings (`"150"`) are accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepParams {
    pub denoise_level: Option<i32>,
    pub binarize_threshold: Option<i32>,
    pub enhance_factor: Option<f32>,
    pub resize_scale: Option<f32>,
    pub sharpen_radius: Option<f32>,
    pub sharpen_sigma: Option<f32>,
    pub border_fuzz: Option<f32>,
}

impl StepParams {
    /// Parse `raw` as a JSON object. Never fails.
    pub fn from_json_lenient(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed pipeline params");
                Self::default()
            }
        }
    }

    /// Extract known keys from a JSON value. Non-objects yield no parameters.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            warn!("Pipeline params are not a JSON object; ignoring");
            return Self::default();
        };
        let int = |key: &str| map.get(key).and_then(json_int);
        let float = |key: &str| map.get(key).and_then(json_float);

        Self {
            denoise_level: int("denoise_level"),
            binarize_threshold: int("binarize_threshold"),
            enhance_factor: float("enhance_factor"),
            resize_scale: float("resize_scale"),
            sharpen_radius: float("sharpen_radius"),
            sharpen_sigma: float("sharpen_sigma"),
            border_fuzz: float("border_fuzz"),
        }
    }
}

fn json_int(v: &Value) -> Option<i32> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(|i| i.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

fn json_float(v: &Value) -> Option<f32> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f as f32)
}
