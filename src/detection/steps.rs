use crate::detection::{blobs, preprocessing};
use crate::pipeline::{MetadataValue, PipelineContext, PipelineData, PipelineStep};
use anyhow::Result;

/// Binarize each eye crop so the dark pupil becomes foreground
pub struct ThresholdStep {
    pub cutoff: u8,
}

impl PipelineStep for ThresholdStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|mut item| {
                item.image = preprocessing::binarize_dark(&item.image, self.cutoff);
                item
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Threshold"
    }
}

/// Cut off the top of the crop, where the eyebrow shadow sits
pub struct TrimTopStep {
    pub fraction: f32,
}

impl PipelineStep for TrimTopStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|mut item| {
                let (trimmed, skipped) = preprocessing::trim_top(&item.image, self.fraction);
                item.image = trimmed;
                item.region.y += skipped;
                item.region.height -= skipped;
                item
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Trim Top"
    }
}

/// Repeated median blur to remove speckle and eyelash noise
pub struct SmoothStep {
    pub iterations: u32,
}

impl PipelineStep for SmoothStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|mut item| {
                item.image = preprocessing::smooth(&item.image, self.iterations);
                item
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Median Smoothing"
    }
}

/// Find the pupil blob and record its centroid in frame coordinates.
/// Items where nothing qualifies pass through without a pupil.
pub struct BlobStep {
    pub min_area: u32,
}

impl PipelineStep for BlobStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::with_capacity(data.len());

        for mut item in data {
            let found = blobs::find_blobs(&item.image, self.min_area);
            item.metadata.insert("blob_count".to_string(), MetadataValue::Int(found.len() as i64));

            if let Some(pupil) = blobs::select_pupil(&found) {
                let c = pupil.centroid();
                item.metadata.insert("pupil_x".to_string(), MetadataValue::Float(item.region.x as f64 + c.x));
                item.metadata.insert("pupil_y".to_string(), MetadataValue::Float(item.region.y as f64 + c.y));
                item.metadata.insert("blob_area".to_string(), MetadataValue::Int(pupil.area() as i64));
                item.metadata.insert("is_pupil".to_string(), MetadataValue::Bool(true));
            }
            result.push(item);
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "Blob Extraction"
    }
}
