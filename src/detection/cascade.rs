//! Staged sliding-window classifier for faces and eyes.
//!
//! A model is a base window plus a list of stages. Each stage sums the votes of
//! its weak classifiers; a window survives only if every stage's sum reaches
//! the stage threshold, so most windows are rejected after one or two stages.
//! Weak classifiers threshold a rectangle feature: the weighted sum of mean
//! intensities of a few rectangles, divided by the window's standard deviation
//! so that lighting changes do not move the decision.
//!
//! Models load from the OpenCV Haar XML format (`haarcascade_eye.xml`,
//! `haarcascade_frontalface_default.xml`) or from a JSON dump of
//! [`CascadeModel`].

use image::GrayImage;
use imageproc::integral_image::{integral_image, integral_squared_image};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::models::BoundingBox;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("failed to read cascade model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cascade model: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to parse cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade model: {0}")]
    Invalid(String),
}

/// Anything that can find candidate regions (faces, eyes) in a grayscale image.
pub trait RegionLocator: Send + Sync {
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

/// OpenCV adds this to every stage threshold before comparing
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

impl CascadeModel {
    /// Parse an OpenCV Haar cascade as written by `opencv_traincascade`.
    ///
    /// Only stump classifiers over upright features are supported, which
    /// covers the stock eye and frontal face cascades. OpenCV divides rectangle
    /// *sums* by the area of the window shrunk by one pixel on each side; the
    /// weights are rescaled so the same decision comes out of rectangle means.
    pub fn from_haar_xml(text: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(text)?;
        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| invalid("no <cascade> element"))?;

        if let Ok(kind) = child(cascade, "featureType") {
            let kind = kind.text().unwrap_or("").trim();
            if kind != "HAAR" {
                return Err(invalid(format!("unsupported feature type {kind}")));
            }
        }
        let window_width: u32 = parse_child(cascade, "width")?;
        let window_height: u32 = parse_child(cascade, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(invalid(format!("window {window_width}x{window_height} is too small")));
        }
        let norm_area = ((window_width - 2) * (window_height - 2)) as f64;

        let features = items(child(cascade, "features")?)
            .map(|feature| parse_feature(feature, norm_area))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child(cascade, "stages")?)
            .enumerate()
            .map(|(s, stage)| {
                let threshold: f64 = parse_child(stage, "stageThreshold")?;
                let classifiers = items(child(stage, "weakClassifiers")?)
                    .map(|weak| parse_stump(weak, &features))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| invalid(format!("stage {s}: {e}")))?;
                Ok(Stage { threshold: threshold - STAGE_THRESHOLD_EPS, classifiers })
            })
            .collect::<Result<Vec<_>, CascadeError>>()?;

        Ok(Self { window_width, window_height, stages })
    }
}

fn invalid(msg: impl Into<String>) -> CascadeError {
    CascadeError::Invalid(msg.into())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, CascadeError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| invalid(format!("missing <{name}> in <{}>", node.tag_name().name())))
}

/// List entries, which OpenCV writes as `<_>` elements
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn numbers(node: Node) -> Result<Vec<f64>, CascadeError> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| invalid(format!("bad number '{t}' in <{}>", node.tag_name().name())))
        })
        .collect()
}

fn parse_child<T: FromStr>(node: Node, name: &str) -> Result<T, CascadeError> {
    let text = child(node, name)?.text().unwrap_or("").trim().to_string();
    text.parse().map_err(|_| invalid(format!("bad <{name}> value '{text}'")))
}

fn parse_feature(feature: Node, norm_area: f64) -> Result<Vec<WeightedRect>, CascadeError> {
    if let Ok(tilted) = child(feature, "tilted") {
        if tilted.text().is_some_and(|t| t.trim() != "0") {
            return Err(invalid("tilted features are not supported"));
        }
    }
    items(child(feature, "rects")?)
        .map(|rect| match numbers(rect)?.as_slice() {
            &[x, y, w, h, weight] if x >= 0.0 && y >= 0.0 && w >= 0.0 && h >= 0.0 => Ok(WeightedRect {
                x: x as u32,
                y: y as u32,
                width: w as u32,
                height: h as u32,
                weight: weight * (w * h) / norm_area,
            }),
            other => Err(invalid(format!("rectangle needs x y w h weight, got {other:?}"))),
        })
        .collect()
}

/// `internalNodes` is `left right feature threshold`; `leafValues` holds the
/// votes for below and above the threshold
fn parse_stump(weak: Node, features: &[Vec<WeightedRect>]) -> Result<WeakClassifier, CascadeError> {
    let nodes = numbers(child(weak, "internalNodes")?)?;
    let leaves = numbers(child(weak, "leafValues")?)?;
    let (&[_, _, index, threshold], &[below, above]) = (nodes.as_slice(), leaves.as_slice()) else {
        return Err(invalid("only single-split classifiers are supported"));
    };
    let feature = features
        .get(index as usize)
        .ok_or_else(|| invalid(format!("feature {index} does not exist")))?
        .clone();
    Ok(WeakClassifier { feature, threshold, below, above })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f64,
    pub classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub feature: Vec<WeightedRect>,
    pub threshold: f64,
    /// Vote when the normalized feature is below `threshold`
    pub below: f64,
    /// Vote otherwise
    pub above: f64,
}

/// Rectangle in base-window coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// Window growth per pyramid level
    pub scale_factor: f64,
    /// Raw hits a group needs before it is reported; 0 disables grouping
    pub min_neighbors: u32,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    /// Relative tolerance for two hits to count as the same object
    pub group_eps: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: None,
            max_size: None,
            group_eps: 0.2,
        }
    }
}

pub struct CascadeClassifier {
    model: CascadeModel,
    params: ScanParams,
}

impl CascadeClassifier {
    pub fn new(model: CascadeModel, params: ScanParams) -> Result<Self, CascadeError> {
        validate(&model)?;
        if params.scale_factor <= 1.0 {
            return Err(CascadeError::Invalid(format!(
                "scale_factor must be > 1.0, got {}",
                params.scale_factor
            )));
        }
        Ok(Self { model, params })
    }

    pub fn from_file(path: &Path, params: ScanParams) -> Result<Self, CascadeError> {
        let content = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => CascadeModel::from_haar_xml(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        debug!(path = %path.display(), stages = model.stages.len(), "cascade model loaded");
        Self::new(model, params)
    }

    pub fn model(&self) -> &CascadeModel {
        &self.model
    }

    /// Scan all positions and scales, then merge overlapping hits
    pub fn detect_multi_scale(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        let integral = IntegralImages::new(gray);
        let base_w = self.model.window_width as f64;
        let base_h = self.model.window_height as f64;

        let mut hits = Vec::new();
        let mut scale = 1.0f64;
        loop {
            let win_w = (base_w * scale).round() as u32;
            let win_h = (base_h * scale).round() as u32;
            if win_w > width || win_h > height {
                break;
            }
            if self.params.max_size.is_some_and(|max| win_w.max(win_h) > max) {
                break;
            }
            if self.params.min_size.is_none_or(|min| win_w.min(win_h) >= min) {
                let step = (scale.round() as u32).max(1);
                let mut y = 0;
                while y + win_h <= height {
                    let mut x = 0;
                    while x + win_w <= width {
                        if self.classify_window(&integral, x, y, win_w, win_h, scale) {
                            hits.push(BoundingBox::new(x, y, win_w, win_h));
                        }
                        x += step;
                    }
                    y += step;
                }
            }
            scale *= self.params.scale_factor;
        }

        debug!(raw_hits = hits.len(), "cascade scan finished");
        if self.params.min_neighbors == 0 {
            return hits;
        }
        group_rectangles(&hits, self.params.min_neighbors, self.params.group_eps)
    }

    fn classify_window(&self, ii: &IntegralImages, x: u32, y: u32, w: u32, h: u32, scale: f64) -> bool {
        let area = (w as f64) * (h as f64);
        let mean = ii.sum(x, y, w, h) as f64 / area;
        let variance = ii.squared_sum(x, y, w, h) as f64 / area - mean * mean;
        let norm = variance.max(0.0).sqrt().max(1.0);

        for stage in &self.model.stages {
            let mut votes = 0.0;
            for weak in &stage.classifiers {
                let mut response = 0.0;
                for r in &weak.feature {
                    let rx = x + (r.x as f64 * scale).round() as u32;
                    let ry = y + (r.y as f64 * scale).round() as u32;
                    let rw = ((r.width as f64 * scale).round() as u32).min(x + w - rx).max(1);
                    let rh = ((r.height as f64 * scale).round() as u32).min(y + h - ry).max(1);
                    let rect_mean = ii.sum(rx, ry, rw, rh) as f64 / (rw as f64 * rh as f64);
                    response += r.weight * rect_mean;
                }
                votes += if response / norm < weak.threshold { weak.below } else { weak.above };
            }
            if votes < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl RegionLocator for CascadeClassifier {
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        self.detect_multi_scale(gray)
    }
}

fn validate(model: &CascadeModel) -> Result<(), CascadeError> {
    if model.window_width == 0 || model.window_height == 0 {
        return Err(CascadeError::Invalid("window must be non-empty".into()));
    }
    if model.stages.is_empty() {
        return Err(CascadeError::Invalid("model has no stages".into()));
    }
    for (s, stage) in model.stages.iter().enumerate() {
        if stage.classifiers.is_empty() {
            return Err(CascadeError::Invalid(format!("stage {s} has no classifiers")));
        }
        for weak in &stage.classifiers {
            for r in &weak.feature {
                if r.width == 0
                    || r.height == 0
                    || r.x + r.width > model.window_width
                    || r.y + r.height > model.window_height
                {
                    return Err(CascadeError::Invalid(format!(
                        "stage {s}: rectangle {r:?} outside the {}x{} window",
                        model.window_width, model.window_height
                    )));
                }
            }
        }
    }
    Ok(())
}

struct IntegralImages {
    sum: image::ImageBuffer<image::Luma<u64>, Vec<u64>>,
    squared: image::ImageBuffer<image::Luma<u64>, Vec<u64>>,
}

impl IntegralImages {
    fn new(gray: &GrayImage) -> Self {
        Self {
            sum: integral_image::<_, u64>(gray),
            squared: integral_squared_image::<_, u64>(gray),
        }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        rect_sum(&self.sum, x, y, w, h)
    }

    fn squared_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        rect_sum(&self.squared, x, y, w, h)
    }
}

// The integral image is one pixel larger than the source: I(x, y) sums all
// pixels strictly above and left of (x, y).
fn rect_sum(ii: &image::ImageBuffer<image::Luma<u64>, Vec<u64>>, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let a = ii.get_pixel(x, y)[0];
    let b = ii.get_pixel(x + w, y)[0];
    let c = ii.get_pixel(x, y + h)[0];
    let d = ii.get_pixel(x + w, y + h)[0];
    (a + d) - (b + c)
}

fn similar(a: &BoundingBox, b: &BoundingBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Cluster similar hits and return one averaged box per cluster that has at
/// least `min_neighbors` members.
pub fn group_rectangles(hits: &[BoundingBox], min_neighbors: u32, eps: f64) -> Vec<BoundingBox> {
    let mut parent: Vec<usize> = (0..hits.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // root -> (count, sum x, sum y, sum w, sum h), in first-seen order
    let mut clusters: Vec<(usize, u64, u64, u64, u64, u64)> = Vec::new();
    for i in 0..hits.len() {
        let root = find(&mut parent, i);
        let h = &hits[i];
        match clusters.iter_mut().find(|c| c.0 == root) {
            Some(c) => {
                c.1 += 1;
                c.2 += h.x as u64;
                c.3 += h.y as u64;
                c.4 += h.width as u64;
                c.5 += h.height as u64;
            }
            None => clusters.push((root, 1, h.x as u64, h.y as u64, h.width as u64, h.height as u64)),
        }
    }

    clusters
        .into_iter()
        .filter(|c| c.1 >= min_neighbors as u64)
        .map(|(_, n, x, y, w, h)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            BoundingBox::new(avg(x), avg(y), avg(w), avg(h))
        })
        .collect()
}
