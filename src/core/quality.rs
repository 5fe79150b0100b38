use crate::config::QualityWeights;
use crate::core::image::PixelGrid;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Long edge of the working copy every metric is measured on.
pub const WORKING_EDGE: u32 = 512;

const BLOCK: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sharpness,
    Contrast,
    Noise,
    CompressionArtifacts,
    ColorRichness,
    Exposure,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Sharpness,
        Metric::Contrast,
        Metric::Noise,
        Metric::CompressionArtifacts,
        Metric::ColorRichness,
        Metric::Exposure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Sharpness => "sharpness",
            Metric::Contrast => "contrast",
            Metric::Noise => "noise",
            Metric::CompressionArtifacts => "compression_artifacts",
            Metric::ColorRichness => "color_richness",
            Metric::Exposure => "exposure",
        }
    }
}

/// Externally measured degradation levels in [0, 1]. When present they
/// replace the estimates derived from pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedMetrics {
    pub noise_level: Option<f64>,
    pub compression_level: Option<f64>,
}

/// Per-metric scores in [0, 1]; `None` marks a metric that could not be measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub sharpness: Option<f64>,
    pub contrast: Option<f64>,
    pub noise: Option<f64>,
    pub compression_artifacts: Option<f64>,
    pub color_richness: Option<f64>,
    pub exposure: Option<f64>,
}

impl SubScores {
    pub fn uniform(score: f64) -> Self {
        Self {
            sharpness: Some(score),
            contrast: Some(score),
            noise: Some(score),
            compression_artifacts: Some(score),
            color_richness: Some(score),
            exposure: Some(score),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Sharpness => self.sharpness,
            Metric::Contrast => self.contrast,
            Metric::Noise => self.noise,
            Metric::CompressionArtifacts => self.compression_artifacts,
            Metric::ColorRichness => self.color_richness,
            Metric::Exposure => self.exposure,
        }
    }

    pub fn unavailable(&self) -> Vec<Metric> {
        Metric::ALL
            .iter()
            .copied()
            .filter(|&metric| self.get(metric).is_none())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub score: f64,
    pub sub_scores: SubScores,
    pub unavailable: Vec<Metric>,
}

impl QualityResult {
    pub fn new(score: f64, sub_scores: SubScores) -> Self {
        Self {
            score: clamp_unit(score),
            unavailable: sub_scores.unavailable(),
            sub_scores,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.unavailable.is_empty()
    }
}

pub struct QualityAssessor {
    weights: QualityWeights,
}

impl QualityAssessor {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    pub fn assess(&self, grid: &PixelGrid, extended: Option<&ExtendedMetrics>) -> QualityResult {
        let working = grid.bounded(WORKING_EDGE);
        let luma = working.luma();
        let extended = extended.copied().unwrap_or_default();

        let noise = match extended.noise_level {
            Some(level) => Some(1.0 - clamp_unit(level)),
            None => noise_level(&luma).map(|level| 1.0 - level),
        };
        let compression_artifacts = match extended.compression_level {
            Some(level) => Some(1.0 - clamp_unit(level)),
            None => blockiness_level(&luma).map(|level| 1.0 - level),
        };

        let sub_scores = SubScores {
            sharpness: sharpness(&luma),
            contrast: contrast(&luma),
            noise,
            compression_artifacts,
            color_richness: color_richness(&working),
            exposure: exposure(&luma),
        };

        let result = QualityResult::new(self.combine(&sub_scores), sub_scores);
        if result.is_partial() {
            log::debug!(
                "Quality metrics unavailable: {:?}",
                result.unavailable.iter().map(Metric::as_str).collect::<Vec<_>>()
            );
        }
        result
    }

    /// Weighted mean over the available metrics. Dropped metrics have their
    /// weight spread over the rest, so the total magnitude is preserved.
    pub fn combine(&self, sub_scores: &SubScores) -> f64 {
        let mut weighted = 0.0;
        let mut available_weight = 0.0;

        for metric in Metric::ALL {
            if let Some(score) = sub_scores.get(metric) {
                let weight = self.weights.weight(metric);
                weighted += weight * clamp_unit(score);
                available_weight += weight;
            }
        }

        if available_weight <= 0.0 {
            return 0.0;
        }
        clamp_unit(weighted / available_weight)
    }
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new(QualityWeights::default())
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn mean_and_variance(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        count += 1;
        sum += v;
        sum_sq += v * v;
    }
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    Some((mean, variance))
}

fn sharpness(luma: &GrayImage) -> Option<f64> {
    let (width, height) = luma.dimensions();
    if width < 3 || height < 3 {
        return None;
    }

    let at = |x: u32, y: u32| luma.get_pixel(x, y)[0] as f64;
    let laplacians = (1..height - 1).flat_map(|y| {
        (1..width - 1).map(move |x| {
            4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1)
        })
    });

    let (_, variance) = mean_and_variance(laplacians)?;
    Some((variance / 1000.0).min(1.0))
}

fn contrast(luma: &GrayImage) -> Option<f64> {
    let (_, variance) = mean_and_variance(luma.pixels().map(|p| p[0] as f64))?;
    Some((variance.sqrt() / 64.0).min(1.0))
}

fn exposure(luma: &GrayImage) -> Option<f64> {
    let (mean, _) = mean_and_variance(luma.pixels().map(|p| p[0] as f64))?;
    Some((1.0 - 2.0 * (mean / 255.0 - 0.5).abs()).max(0.0))
}

fn color_richness(grid: &PixelGrid) -> Option<f64> {
    let saturations = grid.rgb().pixels().map(|p| {
        let max = p[0].max(p[1]).max(p[2]) as f64;
        let min = p[0].min(p[1]).min(p[2]) as f64;
        if max == 0.0 {
            0.0
        } else {
            (max - min) / max
        }
    });

    let (mean, variance) = mean_and_variance(saturations)?;
    let spread = variance.sqrt();
    Some(0.5 * (mean / 0.5).min(1.0) + 0.5 * (spread / 0.25).min(1.0))
}

/// Residual noise in the flattest quarter of 8x8 blocks.
fn noise_level(luma: &GrayImage) -> Option<f64> {
    let (width, height) = luma.dimensions();
    let (cols, rows) = (width / BLOCK, height / BLOCK);
    if (cols * rows) < 4 {
        return None;
    }

    let mut variances = Vec::with_capacity((cols * rows) as usize);
    for by in 0..rows {
        for bx in 0..cols {
            let pixels = (0..BLOCK).flat_map(|dy| {
                (0..BLOCK).map(move |dx| {
                    luma.get_pixel(bx * BLOCK + dx, by * BLOCK + dy)[0] as f64
                })
            });
            if let Some((_, variance)) = mean_and_variance(pixels) {
                variances.push(variance);
            }
        }
    }

    variances.sort_by(f64::total_cmp);
    let flattest = (variances.len() / 4).max(1);
    let mean_var = variances[..flattest].iter().sum::<f64>() / flattest as f64;
    Some((mean_var.sqrt() / 16.0).min(1.0))
}

/// Excess horizontal step across 8-px block boundaries relative to block interiors.
fn blockiness_level(luma: &GrayImage) -> Option<f64> {
    let (width, height) = luma.dimensions();
    if width < 16 {
        return None;
    }

    let (mut boundary_sum, mut boundary_count) = (0.0, 0usize);
    let (mut interior_sum, mut interior_count) = (0.0, 0usize);
    for y in 0..height {
        for x in 1..width {
            let step = (luma.get_pixel(x, y)[0] as f64 - luma.get_pixel(x - 1, y)[0] as f64).abs();
            if x % BLOCK == 0 {
                boundary_sum += step;
                boundary_count += 1;
            } else {
                interior_sum += step;
                interior_count += 1;
            }
        }
    }

    let boundary = if boundary_count > 0 { boundary_sum / boundary_count as f64 } else { 0.0 };
    let interior = if interior_count > 0 { interior_sum / interior_count as f64 } else { 0.0 };
    if boundary + interior == 0.0 {
        return Some(0.0);
    }
    Some(clamp_unit((boundary - interior) / (boundary + interior)))
}
