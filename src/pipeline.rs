use anyhow::{Context, Result};
use image::GrayImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::models::{BoundingBox, Point2D};

/// Data that flows through the pupil pipeline.
/// Each PipelineData is one eye region cropped out of a grayscale frame.
#[derive(Clone)]
pub struct PipelineData {
    /// Current working image (starts as the crop, ends binary)
    pub image: GrayImage,

    /// Where `image` sits in the full frame. Steps that crop further must
    /// move this so that `origin + pixel` stays a frame coordinate.
    pub region: BoundingBox,

    /// The eye box the region was cut from, used for the center fallback
    pub eye_box: BoundingBox,

    /// Per-step measurements (e.g., "pupil_x", "blob_area")
    pub metadata: HashMap<String, MetadataValue>,
}

/// Metadata value types
#[derive(Debug, Clone)]
pub enum MetadataValue {
    Bool(bool),
    Float(f64),
    Int(i64),
}

impl PipelineData {
    /// Crop an eye box out of a grayscale frame
    pub fn from_eye_box(frame: &GrayImage, eye_box: BoundingBox) -> Option<Self> {
        let region = eye_box.clamp_to(frame.width(), frame.height())?;
        let image = image::imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
        Some(Self {
            image,
            region,
            eye_box: region,
            metadata: HashMap::new(),
        })
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Pupil position in frame coordinates, if a step located one
    pub fn pupil(&self) -> Option<Point2D> {
        Some(Point2D::new(self.get_float("pupil_x")?, self.get_float("pupil_y")?))
    }

    /// Pupil position, or the geometric center of the eye box when no blob
    /// survived the pipeline
    pub fn pupil_or_center(&self) -> Point2D {
        self.pupil().unwrap_or_else(|| self.eye_box.center())
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Context available to all pipeline steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Transform every eye region. A step may annotate or replace the image
    /// but must keep one output per input so eyes stay paired with their boxes.
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>>;

    /// Human-readable name for this step (used in logs and debug folders)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                anyhow::bail!("Debug directory is not empty: {}", output_dir.display());
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Drop every step but keep the context (debug output)
    pub fn without_steps(mut self) -> Self {
        self.steps.clear();
        self
    }

    /// Run every step in order over the eye regions
    pub fn run(&self, input: Vec<PipelineData>) -> Result<Vec<PipelineData>> {
        self.save_debug("input", 0, &input)?;

        let mut data = input;
        for (step_idx, step) in self.steps.iter().enumerate() {
            debug!(step = step.name(), items = data.len(), "running pupil step");
            data = step.process(data, &self.context)?;
            self.save_debug(step.name(), step_idx + 1, &data)?;
        }

        Ok(data)
    }

    fn save_debug(&self, step_name: &str, step_idx: usize, data: &[PipelineData]) -> Result<()> {
        let Some(debug_config) = &self.context.debug else {
            return Ok(());
        };

        let step_dir_name = format!("{:02}_{}", step_idx, step_name.to_lowercase().replace(' ', "_"));
        let step_dir = debug_config.output_dir.join(&step_dir_name);
        std::fs::create_dir_all(&step_dir)?;

        for (idx, item) in data.iter().enumerate() {
            let output_path = step_dir.join(format!("eye{:02}.png", idx + 1));
            item.image
                .save(&output_path)
                .with_context(|| format!("Failed to save debug image {}", output_path.display()))?;
        }
        debug!("saved {} debug images to {}/", data.len(), step_dir_name);

        Ok(())
    }
}
