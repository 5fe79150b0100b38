use crate::core::image::{PixelGrid, TechnicalMetrics};
use crate::core::quality::WORKING_EDGE;
use serde::Serialize;
use std::collections::BTreeSet;

/// Confidence above which an item is reported as enhanced.
pub const AI_THRESHOLD: f64 = 0.5;

const TOOL_KEYWORDS: &[&str] = &[
    "topaz",
    "gigapixel",
    "realesrgan",
    "esrgan",
    "waifu2x",
    "upscayl",
    "remini",
    "letsenhance",
    "ai_enhanced",
    "superres",
];

const NATIVE_RESOLUTIONS: &[(u32, u32)] = &[
    (640, 480),
    (720, 480),
    (720, 576),
    (800, 600),
    (1024, 768),
    (1280, 720),
    (1366, 768),
    (1920, 1080),
];

const UPSCALE_FACTORS: &[u32] = &[2, 4];

const FLAT_GRADIENT: i32 = 2;
const EDGE_GRADIENT: i32 = 32;
const MIN_FLAT_FRACTION: f64 = 0.85;
const MIN_EDGE_FRACTION: f64 = 0.005;

const EFFICIENT_MIN_PIXELS: u64 = 2_000_000;
const EFFICIENT_MAX_BPP: f64 = 0.5;

/// Everything a rule may look at for one item.
pub struct DetectionInput<'a> {
    pub grid: &'a PixelGrid,
    pub file_name: &'a str,
    pub metrics: &'a TechnicalMetrics,
}

/// One independent heuristic. `predicate` returns the indicator to record
/// when it fires.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub weight: f64,
    pub predicate: fn(&DetectionInput) -> Option<String>,
}

impl Rule {
    pub fn evaluate(&self, input: &DetectionInput) -> Option<String> {
        (self.predicate)(input)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "filename_keyword",
            weight: 0.35,
            predicate: filename_keyword,
        },
        Rule {
            name: "smooth_gradients",
            weight: 0.25,
            predicate: smooth_gradients,
        },
        Rule {
            name: "integer_upscale_resolution",
            weight: 0.20,
            predicate: integer_upscale_resolution,
        },
        Rule {
            name: "efficient_compression",
            weight: 0.20,
            predicate: efficient_compression,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementResult {
    confidence: f64,
    is_ai_enhanced: bool,
    indicators: BTreeSet<String>,
}

impl EnhancementResult {
    /// Confidence is clamped to [0, 1] and the enhanced flag derived from it.
    pub fn new(confidence: f64, indicators: BTreeSet<String>) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            confidence,
            is_ai_enhanced: confidence > AI_THRESHOLD,
            indicators,
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, BTreeSet::new())
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_ai_enhanced(&self) -> bool {
        self.is_ai_enhanced
    }

    pub fn indicators(&self) -> &BTreeSet<String> {
        &self.indicators
    }
}

pub struct EnhancementDetector {
    rules: Vec<Rule>,
}

impl EnhancementDetector {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn detect(
        &self,
        grid: &PixelGrid,
        file_name: &str,
        metrics: &TechnicalMetrics,
    ) -> EnhancementResult {
        let input = DetectionInput {
            grid,
            file_name,
            metrics,
        };

        let mut confidence = 0.0;
        let mut indicators = BTreeSet::new();
        for rule in &self.rules {
            if let Some(indicator) = rule.evaluate(&input) {
                log::debug!("{}: rule {} fired ({})", file_name, rule.name, indicator);
                confidence += rule.weight;
                indicators.insert(indicator);
            }
        }

        EnhancementResult::new(confidence.min(1.0), indicators)
    }
}

impl Default for EnhancementDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn filename_keyword(input: &DetectionInput) -> Option<String> {
    file_name_indicator(input.file_name)
}

/// The indicator the file-name rule reports for `file_name`, if any.
pub fn file_name_indicator(file_name: &str) -> Option<String> {
    let name = file_name.to_lowercase();
    TOOL_KEYWORDS
        .iter()
        .find(|keyword| name.contains(*keyword))
        .map(|keyword| format!("filename:{}", keyword))
}

/// Mostly flat fills broken by a few crisp edges, typical of upscaler output.
fn smooth_gradients(input: &DetectionInput) -> Option<String> {
    let luma = input.grid.bounded(WORKING_EDGE).luma();
    let (width, height) = luma.dimensions();
    if width < 2 || height < 2 {
        return None;
    }

    let mut flat = 0u64;
    let mut edges = 0u64;
    let mut total = 0u64;
    for y in 0..height - 1 {
        for x in 0..width - 1 {
            let p = luma.get_pixel(x, y)[0] as i32;
            let dx = (luma.get_pixel(x + 1, y)[0] as i32 - p).abs();
            let dy = (luma.get_pixel(x, y + 1)[0] as i32 - p).abs();
            let magnitude = dx + dy;

            if magnitude <= FLAT_GRADIENT {
                flat += 1;
            }
            if magnitude > EDGE_GRADIENT {
                edges += 1;
            }
            total += 1;
        }
    }

    let flat_fraction = flat as f64 / total as f64;
    let edge_fraction = edges as f64 / total as f64;
    if flat_fraction > MIN_FLAT_FRACTION && edge_fraction >= MIN_EDGE_FRACTION {
        Some("smooth_gradients".to_string())
    } else {
        None
    }
}

fn integer_upscale_resolution(input: &DetectionInput) -> Option<String> {
    let (w, h) = (input.metrics.width, input.metrics.height);
    let matches = NATIVE_RESOLUTIONS.iter().any(|&(bw, bh)| {
        UPSCALE_FACTORS.iter().any(|&k| {
            let (sw, sh) = (bw * k, bh * k);
            (w, h) == (sw, sh) || (w, h) == (sh, sw)
        })
    });
    matches.then(|| "integer_upscale_resolution".to_string())
}

fn efficient_compression(input: &DetectionInput) -> Option<String> {
    if input.metrics.pixel_count() < EFFICIENT_MIN_PIXELS {
        return None;
    }
    let bpp = input.metrics.bits_per_pixel()?;
    (bpp < EFFICIENT_MAX_BPP).then(|| "efficient_compression".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(width: u32, height: u32, file_size: u64) -> TechnicalMetrics {
        TechnicalMetrics {
            width,
            height,
            file_size,
            format: Some("jpg".to_string()),
        }
    }

    fn noisy(width: u32, height: u32) -> PixelGrid {
        PixelGrid::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(73) ^ y.wrapping_mul(151)) % 256;
            [v as u8, (v * 3 % 256) as u8, (255 - v) as u8]
        })
    }

    fn half_and_half() -> PixelGrid {
        PixelGrid::from_luma_fn(64, 64, |x, _| if x < 32 { 0 } else { 255 })
    }

    fn rule(name: &str) -> Rule {
        default_rules()
            .into_iter()
            .find(|rule| rule.name == name)
            .unwrap()
    }

    #[test]
    fn test_keyword_in_file_name() {
        let grid = noisy(64, 64);
        let metrics = metrics(64, 64, 200_000);
        let detector = EnhancementDetector::new();

        let result = detector.detect(&grid, "holiday_topaz.jpg", &metrics);
        assert!(result.indicators().contains("filename:topaz"));
        assert!(result.confidence() >= 0.3);
        assert!(!result.is_ai_enhanced());
    }

    #[test]
    fn test_specific_keyword_wins() {
        let grid = noisy(8, 8);
        let metrics = metrics(8, 8, 10_000);
        let input = DetectionInput {
            grid: &grid,
            file_name: "IMG_RealESRGAN_x4.PNG",
            metrics: &metrics,
        };
        assert_eq!(
            rule("filename_keyword").evaluate(&input),
            Some("filename:realesrgan".to_string())
        );
    }

    #[test]
    fn test_plain_file_name_does_not_fire() {
        let grid = noisy(8, 8);
        let metrics = metrics(8, 8, 10_000);
        let input = DetectionInput {
            grid: &grid,
            file_name: "IMG_2041.jpg",
            metrics: &metrics,
        };
        assert_eq!(rule("filename_keyword").evaluate(&input), None);
    }

    #[test]
    fn test_ordinary_edit_words_do_not_fire() {
        let grid = noisy(8, 8);
        let metrics = metrics(8, 8, 10_000);
        for file_name in ["enhanced_contrast.jpg", "upscale_test.jpg", "upscaled_print.png"] {
            let input = DetectionInput {
                grid: &grid,
                file_name,
                metrics: &metrics,
            };
            assert_eq!(rule("filename_keyword").evaluate(&input), None, "{file_name}");
        }

        let input = DetectionInput {
            grid: &grid,
            file_name: "portrait_ai_enhanced.jpg",
            metrics: &metrics,
        };
        assert_eq!(
            rule("filename_keyword").evaluate(&input),
            Some("filename:ai_enhanced".to_string())
        );
    }

    #[test]
    fn test_smooth_gradients_rule() {
        let metrics = metrics(64, 64, 50_000);
        let smooth = half_and_half();
        let flat = PixelGrid::from_luma_fn(64, 64, |_, _| 128);
        let noise = noisy(64, 64);

        let check = |grid: &PixelGrid| {
            rule("smooth_gradients").evaluate(&DetectionInput {
                grid,
                file_name: "a.png",
                metrics: &metrics,
            })
        };
        assert_eq!(check(&smooth), Some("smooth_gradients".to_string()));
        assert_eq!(check(&flat), None);
        assert_eq!(check(&noise), None);
    }

    #[test]
    fn test_integer_upscale_rule() {
        let grid = noisy(4, 4);
        let fires = |w: u32, h: u32| {
            let metrics = metrics(w, h, 5_000_000);
            rule("integer_upscale_resolution")
                .evaluate(&DetectionInput {
                    grid: &grid,
                    file_name: "a.jpg",
                    metrics: &metrics,
                })
                .is_some()
        };

        assert!(fires(3840, 2160));
        assert!(fires(2160, 3840));
        assert!(fires(2560, 1920));
        assert!(!fires(1920, 1080));
        assert!(!fires(4032, 3024));
    }

    #[test]
    fn test_efficient_compression_rule() {
        let grid = noisy(4, 4);
        let fires = |w: u32, h: u32, size: u64| {
            let metrics = metrics(w, h, size);
            rule("efficient_compression")
                .evaluate(&DetectionInput {
                    grid: &grid,
                    file_name: "a.jpg",
                    metrics: &metrics,
                })
                .is_some()
        };

        // 12 MP at 0.27 bits per pixel
        assert!(fires(4000, 3000, 400_000));
        // Same size, normal bitrate
        assert!(!fires(4000, 3000, 4_000_000));
        // Too small to judge
        assert!(!fires(1000, 1000, 10_000));
    }

    #[test]
    fn test_weights_accumulate_and_cap() {
        let grid = half_and_half();
        let metrics = metrics(3840, 2160, 300_000);
        let result = EnhancementDetector::new().detect(&grid, "photo_topaz.jpg", &metrics);

        assert_eq!(result.indicators().len(), 4);
        assert!((result.confidence() - 1.0).abs() < 1e-9);
        assert!(result.is_ai_enhanced());
    }

    #[test]
    fn test_threshold_is_strict() {
        let at_threshold = EnhancementResult::new(0.5, BTreeSet::new());
        assert!(!at_threshold.is_ai_enhanced());
        let above = EnhancementResult::new(0.55, BTreeSet::new());
        assert!(above.is_ai_enhanced());
    }

    #[test]
    fn test_custom_rules() {
        let always = Rule {
            name: "always",
            weight: 0.6,
            predicate: |_| Some("always".to_string()),
        };
        let detector = EnhancementDetector::with_rules(vec![always]);
        let grid = noisy(4, 4);
        let result = detector.detect(&grid, "x.png", &metrics(4, 4, 100));
        assert!(result.is_ai_enhanced());
        assert_eq!(result.confidence(), 0.6);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let grid = half_and_half();
        let metrics = metrics(1280, 720, 90_000);
        let detector = EnhancementDetector::new();
        assert_eq!(
            detector.detect(&grid, "gigapixel.png", &metrics),
            detector.detect(&grid, "gigapixel.png", &metrics)
        );
    }
}
