//! Detection cascade around the frozen networks.
//!
//! A detector feeds an image pyramid through PNet, turns the probability and
//! regression maps into candidate boxes, and refines the survivors with RNet
//! and ONet. Everything here is plain arithmetic on network outputs; running
//! the networks and cropping images is left to a [`StageRunner`].

use std::cmp::Ordering;

use anyhow::Result;
use log::debug;

use crate::network::StageKind;
use mtcnn_utils::timing_guard;

/// PNet output stride, in input pixels.
const PNET_STRIDE: f64 = 2.0;
/// PNet receptive field, in input pixels.
const PNET_CELL_SIZE: f64 = 12.0;

/// Cascade parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Smallest face size to look for, in pixels.
    pub min_size: f64,
    /// Ratio between consecutive pyramid levels.
    pub scale_factor: f64,
    /// Face probability thresholds for PNet, RNet and ONet.
    pub score_thresholds: [f32; 3],
    /// IoU threshold for suppression within one pyramid level.
    pub scale_nms_threshold: f32,
    /// IoU threshold for suppression across levels and after each refinement.
    pub stage_nms_threshold: f32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            min_size: 20.0,
            scale_factor: 0.709,
            score_thresholds: [0.6, 0.7, 0.7],
            scale_nms_threshold: 0.5,
            stage_nms_threshold: 0.7,
        }
    }
}

impl CascadeConfig {
    /// Override the pyramid and thresholds. Non-positive values keep the current setting.
    pub fn configure(
        &mut self,
        scale_factor: f64,
        min_size: f64,
        score_thresholds: Option<[f32; 3]>,
    ) {
        if scale_factor > 0.0 {
            self.scale_factor = scale_factor;
        }
        if min_size > 0.0 {
            self.min_size = min_size;
        }
        if let Some(thresholds) = score_thresholds {
            self.score_thresholds = thresholds;
        }
    }
}

/// Axis-aligned box given by its corners, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union; degenerate boxes never overlap.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let intersection_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = intersection_w * intersection_h;
        if intersection <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Shift each corner by its regression offset, scaled by the inclusive box size.
    pub fn adjust(self, reg: [f32; 4]) -> Self {
        let w = self.width() + 1.0;
        let h = self.height() + 1.0;
        Self {
            x1: self.x1 + reg[0] * w,
            y1: self.y1 + reg[1] * h,
            x2: self.x2 + reg[2] * w,
            y2: self.y2 + reg[3] * h,
        }
    }

    /// Grow the shorter side about the centre until the box is square.
    pub fn square(self) -> Self {
        let (w, h) = (self.width(), self.height());
        let side = w.max(h);
        let x1 = self.x1 + 0.5 * w - 0.5 * side;
        let y1 = self.y1 + 0.5 * h - 0.5 * side;
        Self {
            x1,
            y1,
            x2: x1 + side,
            y2: y1 + side,
        }
    }

    /// `[y1, x1, y2, x2]` as fractions of the image size, the layout crop-and-resize takes.
    pub fn normalized(&self, width: f32, height: f32) -> [f32; 4] {
        [
            self.y1 / height,
            self.x1 / width,
            self.y2 / height,
            self.x2 / width,
        ]
    }
}

/// A face candidate with the regression offsets of the stage that scored it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub reg: [f32; 4],
    pub score: f32,
}

/// PNet outputs for one pyramid level, batch of one.
///
/// Rows and columns follow the image orientation. `prob` holds two values per
/// cell (background, face) and `reg` four corner offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalMaps {
    rows: usize,
    cols: usize,
    prob: Vec<f32>,
    reg: Vec<f32>,
}

impl ProposalMaps {
    pub fn new(rows: usize, cols: usize, prob: Vec<f32>, reg: Vec<f32>) -> Result<Self> {
        let cells = rows * cols;
        anyhow::ensure!(
            prob.len() == cells * 2,
            "PNet probability map must hold {} values for {rows}x{cols} cells (got {})",
            cells * 2,
            prob.len()
        );
        anyhow::ensure!(
            reg.len() == cells * 4,
            "PNet regression map must hold {} values for {rows}x{cols} cells (got {})",
            cells * 4,
            reg.len()
        );
        Ok(Self {
            rows,
            cols,
            prob,
            reg,
        })
    }

    fn face_score(&self, row: usize, col: usize) -> f32 {
        self.prob[(row * self.cols + col) * 2 + 1]
    }

    fn offsets(&self, row: usize, col: usize) -> [f32; 4] {
        let start = (row * self.cols + col) * 4;
        [
            self.reg[start],
            self.reg[start + 1],
            self.reg[start + 2],
            self.reg[start + 3],
        ]
    }
}

/// RNet or ONet output for one crop: box regression and face probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOutput {
    pub reg: [f32; 4],
    pub score: f32,
}

/// Runs the networks on behalf of [`detect_faces`].
pub trait StageRunner {
    /// PNet maps for the image resized by `scale`.
    fn propose(&mut self, scale: f64) -> Result<ProposalMaps>;

    /// RNet or ONet outputs for crops of `boxes`, one per box, in order.
    ///
    /// Boxes use the [`BoundingBox::normalized`] layout and may reach past the
    /// image border.
    fn refine(&mut self, stage: StageKind, boxes: &[[f32; 4]]) -> Result<Vec<StageOutput>>;
}

/// Pyramid scales for an image, largest first.
///
/// The first level maps `min_size` faces onto the 12 pixel PNet cell; levels
/// shrink by `factor` while the shorter side still covers one cell.
pub fn scales(height: f64, width: f64, factor: f64, min_size: f64) -> Result<Vec<f64>> {
    anyhow::ensure!(
        factor > 0.0 && factor < 1.0,
        "scale factor must lie in (0, 1) (got {factor})"
    );
    anyhow::ensure!(min_size > 0.0, "minimum face size must be positive (got {min_size})");

    let base = PNET_CELL_SIZE / min_size;
    let mut min_side = height.min(width) * base;
    let mut scales = Vec::new();
    while min_side > PNET_CELL_SIZE {
        scales.push(base * factor.powi(scales.len() as i32));
        min_side *= factor;
    }
    Ok(scales)
}

/// Candidates for every PNet cell whose face probability exceeds `threshold`.
///
/// Cell `(row, col)` maps back to a 12 pixel window at `2 * (row, col) + 1`
/// in the resized image, scaled back into original image pixels.
pub fn generate_bbox(maps: &ProposalMaps, scale: f64, threshold: f32) -> Vec<Candidate> {
    let project = |cell: usize, extent: f64| {
        ((PNET_STRIDE * cell as f64 + 1.0 + extent) / scale + 0.5).floor() as f32
    };

    let mut candidates = Vec::new();
    for row in 0..maps.rows {
        for col in 0..maps.cols {
            let score = maps.face_score(row, col);
            if score <= threshold {
                continue;
            }
            candidates.push(Candidate {
                bbox: BoundingBox {
                    x1: project(col, 0.0),
                    y1: project(row, 0.0),
                    x2: project(col, PNET_CELL_SIZE),
                    y2: project(row, PNET_CELL_SIZE),
                },
                reg: maps.offsets(row, col),
                score,
            });
        }
    }
    candidates
}

/// Greedy non-maximum suppression, best score first.
///
/// A candidate is dropped when its IoU with an already kept one exceeds
/// `threshold`. Ties keep their input order.
pub fn nms(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|other| candidate.bbox.iou(&other.bbox) <= threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

/// Keep the candidates a refinement stage scored above `threshold`, taking
/// over that stage's regression and score.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    outputs: &[StageOutput],
    threshold: f32,
) -> Result<Vec<Candidate>> {
    anyhow::ensure!(
        candidates.len() == outputs.len(),
        "stage returned {} outputs for {} candidates",
        outputs.len(),
        candidates.len()
    );
    Ok(candidates
        .into_iter()
        .zip(outputs)
        .filter(|(_, output)| output.score > threshold)
        .map(|(candidate, output)| Candidate {
            bbox: candidate.bbox,
            reg: output.reg,
            score: output.score,
        })
        .collect())
}

/// Apply each candidate's regression, squaring the result for the next crop.
pub fn calibrate(candidates: &mut [Candidate], square: bool) {
    for candidate in candidates {
        let adjusted = candidate.bbox.adjust(candidate.reg);
        candidate.bbox = if square { adjusted.square() } else { adjusted };
    }
}

/// Run the three-stage cascade on a `height` x `width` image.
pub fn detect_faces<R: StageRunner + ?Sized>(
    runner: &mut R,
    height: usize,
    width: usize,
    config: &CascadeConfig,
) -> Result<Vec<Candidate>> {
    let _guard = timing_guard("mtcnn_core::detect_faces", log::Level::Debug);
    let [pnet_threshold, rnet_threshold, onet_threshold] = config.score_thresholds;

    let mut proposals = Vec::new();
    for scale in scales(height as f64, width as f64, config.scale_factor, config.min_size)? {
        let maps = runner.propose(scale)?;
        let level = generate_bbox(&maps, scale, pnet_threshold);
        proposals.extend(nms(level, config.scale_nms_threshold));
    }
    let mut candidates = nms(proposals, config.stage_nms_threshold);
    debug!("pnet kept {} candidates", candidates.len());

    for (stage, threshold) in [
        (StageKind::RNet, rnet_threshold),
        (StageKind::ONet, onet_threshold),
    ] {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        calibrate(&mut candidates, true);
        let crops: Vec<[f32; 4]> = candidates
            .iter()
            .map(|candidate| candidate.bbox.normalized(width as f32, height as f32))
            .collect();
        let outputs = runner.refine(stage, &crops)?;
        candidates = filter_candidates(candidates, &outputs, threshold)?;
        if stage == StageKind::RNet {
            candidates = nms(candidates, config.stage_nms_threshold);
        }
        debug!("{stage} kept {} candidates", candidates.len());
    }

    calibrate(&mut candidates, false);
    Ok(nms(candidates, config.stage_nms_threshold))
}
