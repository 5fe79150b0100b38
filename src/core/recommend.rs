use crate::core::duplicate::Cluster;
use crate::core::record::AnalysisRecord;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecommendError {
    #[error("Cluster has {0} member(s); at least 2 are required")]
    ClusterTooSmall(usize),

    #[error("No quality score for {identity}")]
    MissingAnalysis { identity: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Keep,
    Discard,
    Flag,
}

/// Keep/discard advice for one cluster. Buckets list identities in cluster
/// order and, together with `best`, cover every member exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub best: String,
    pub best_quality: f64,
    pub best_is_ai_enhanced: bool,
    pub duplicates: Vec<String>,
    pub lower_quality: Vec<String>,
    pub ai_enhanced: Vec<String>,
    /// Members whose bytes equal the kept copy's. They also appear in one of
    /// the buckets above.
    pub exact_copies: Vec<String>,
    pub total_size: u64,
    pub potential_savings: u64,
    pub explanation: String,
}

impl Recommendation {
    pub fn action_for(&self, identity: &str) -> Option<Action> {
        let contains = |bucket: &[String]| bucket.iter().any(|member| member == identity);

        if self.best == identity {
            Some(Action::Keep)
        } else if contains(&self.ai_enhanced) {
            Some(Action::Flag)
        } else if contains(&self.duplicates) || contains(&self.lower_quality) {
            Some(Action::Discard)
        } else {
            None
        }
    }

    pub fn member_count(&self) -> usize {
        1 + self.duplicates.len() + self.lower_quality.len() + self.ai_enhanced.len()
    }
}

pub struct RecommendationEngine {
    duplicate_quality_tolerance: f64,
}

impl RecommendationEngine {
    pub fn new(duplicate_quality_tolerance: f64) -> Self {
        Self {
            duplicate_quality_tolerance: duplicate_quality_tolerance.max(0.0),
        }
    }

    pub fn recommend_cluster(
        &self,
        cluster: &Cluster,
        batch: &[AnalysisRecord],
    ) -> Result<Recommendation, RecommendError> {
        self.recommend(&cluster.records(batch))
    }

    pub fn recommend(&self, members: &[&AnalysisRecord]) -> Result<Recommendation, RecommendError> {
        if members.len() < 2 {
            return Err(RecommendError::ClusterTooSmall(members.len()));
        }

        let mut scored = Vec::with_capacity(members.len());
        for &record in members {
            let score = record
                .quality_score()
                .ok_or_else(|| RecommendError::MissingAnalysis {
                    identity: record.identity().to_string(),
                })?;
            scored.push((record, score));
        }

        let mut best_at = 0;
        for (i, candidate) in scored.iter().enumerate().skip(1) {
            if ranks_above(*candidate, scored[best_at]) {
                best_at = i;
            }
        }
        let (best, best_quality) = scored[best_at];

        let mut duplicates = Vec::new();
        let mut lower_quality = Vec::new();
        let mut ai_enhanced = Vec::new();
        for (i, &(record, score)) in scored.iter().enumerate() {
            if i == best_at {
                continue;
            }
            let identity = record.identity().to_string();
            if record.is_ai_enhanced() {
                ai_enhanced.push(identity);
            } else if best_quality - score > self.duplicate_quality_tolerance {
                lower_quality.push(identity);
            } else {
                duplicates.push(identity);
            }
        }

        let exact_copies: Vec<String> = match best.content_key() {
            Some(key) => scored
                .iter()
                .enumerate()
                .filter(|&(i, &(record, _))| i != best_at && record.content_key() == Some(key))
                .map(|(_, &(record, _))| record.identity().to_string())
                .collect(),
            None => Vec::new(),
        };

        let total_size: u64 = members.iter().map(|record| record.file_size()).sum();
        let potential_savings = total_size - best.file_size();

        let mut explanation = format!(
            "Keep {} (quality {:.2}). {} duplicate(s), {} lower quality, {} AI-enhanced; removing the others frees {}.",
            best.file_name(),
            best_quality,
            duplicates.len(),
            lower_quality.len(),
            ai_enhanced.len(),
            format_size(potential_savings)
        );
        if !exact_copies.is_empty() {
            explanation.push_str(&format!(
                " {} byte-identical to the kept copy.",
                exact_copies.len()
            ));
        }
        if best.is_ai_enhanced() {
            explanation.push_str(" Best copy also shows enhancement indicators.");
        }

        Ok(Recommendation {
            best: best.identity().to_string(),
            best_quality,
            best_is_ai_enhanced: best.is_ai_enhanced(),
            duplicates,
            lower_quality,
            ai_enhanced,
            exact_copies,
            total_size,
            potential_savings,
            explanation,
        })
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// Higher score wins, then the larger file, then the smaller identity.
fn ranks_above(candidate: (&AnalysisRecord, f64), current: (&AnalysisRecord, f64)) -> bool {
    let ordering = candidate
        .1
        .total_cmp(&current.1)
        .then_with(|| candidate.0.file_size().cmp(&current.0.file_size()))
        .then_with(|| current.0.identity().cmp(candidate.0.identity()));
    ordering == Ordering::Greater
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} {}", size, UNITS[UNITS.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enhancement::EnhancementResult;
    use crate::core::hash::{FixedHash, MediaHashes};
    use crate::core::image::{MediaItem, MediaType, TechnicalMetrics};
    use crate::core::quality::{QualityResult, SubScores};
    use std::collections::BTreeSet;

    fn record(id: &str, quality: f64, size: u64, ai: bool) -> AnalysisRecord {
        let item = MediaItem::new(id, format!("/lib/{id}.jpg"), MediaType::Image, size);
        let hash = FixedHash::from_bits(1);
        let enhancement = if ai {
            EnhancementResult::new(0.8, ["filename:topaz".to_string()].into_iter().collect())
        } else {
            EnhancementResult::new(0.0, BTreeSet::new())
        };
        AnalysisRecord::analyzed(
            &item,
            TechnicalMetrics {
                width: 100,
                height: 100,
                file_size: size,
                format: Some("jpg".to_string()),
            },
            MediaHashes::new(hash, hash, hash),
            QualityResult::new(quality, SubScores::uniform(quality)),
            enhancement,
        )
    }

    fn assert_covers(rec: &Recommendation, members: &[&AnalysisRecord]) {
        let mut all: Vec<&str> = vec![rec.best.as_str()];
        all.extend(rec.duplicates.iter().map(String::as_str));
        all.extend(rec.lower_quality.iter().map(String::as_str));
        all.extend(rec.ai_enhanced.iter().map(String::as_str));
        all.sort_unstable();
        let mut expected: Vec<&str> = members.iter().map(|record| record.identity()).collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_mixed_cluster_buckets() {
        let a = record("a", 0.9, 3_000_000, false);
        let b = record("b", 0.85, 2_500_000, false);
        let c = record("c", 0.6, 1_000_000, false);
        let d = record("d", 0.6, 4_000_000, true);
        let members = [&a, &b, &c, &d];

        let rec = RecommendationEngine::default().recommend(&members).unwrap();
        assert_eq!(rec.best, "a");
        assert_eq!(rec.duplicates, vec!["b"]);
        assert_eq!(rec.lower_quality, vec!["c"]);
        assert_eq!(rec.ai_enhanced, vec!["d"]);
        assert_eq!(rec.total_size, 10_500_000);
        assert_eq!(rec.potential_savings, 7_500_000);
        assert_covers(&rec, &members);
    }

    #[test]
    fn test_zero_tolerance_is_strict() {
        let a = record("a", 0.9, 10, false);
        let b = record("b", 0.85, 10, false);
        let c = record("c", 0.9, 5, false);

        let rec = RecommendationEngine::new(0.0).recommend(&[&a, &b, &c]).unwrap();
        assert_eq!(rec.best, "a");
        assert_eq!(rec.lower_quality, vec!["b"]);
        assert_eq!(rec.duplicates, vec!["c"]);
    }

    #[test]
    fn test_ties_prefer_larger_file_then_identity() {
        let small = record("a", 0.7, 100, false);
        let large = record("z", 0.7, 200, false);
        let rec = RecommendationEngine::default().recommend(&[&small, &large]).unwrap();
        assert_eq!(rec.best, "z");

        let first = record("m", 0.7, 100, false);
        let second = record("b", 0.7, 100, false);
        let rec = RecommendationEngine::default().recommend(&[&first, &second]).unwrap();
        assert_eq!(rec.best, "b");
        assert_eq!(rec.duplicates, vec!["m"]);
    }

    #[test]
    fn test_ai_status_checked_before_quality() {
        let best = record("best", 0.9, 100, false);
        let ai_close = record("close", 0.89, 100, true);
        let rec = RecommendationEngine::default().recommend(&[&best, &ai_close]).unwrap();
        assert_eq!(rec.ai_enhanced, vec!["close"]);
        assert!(rec.duplicates.is_empty());
    }

    #[test]
    fn test_enhanced_best_is_called_out() {
        let best = record("best", 0.95, 100, true);
        let other = record("other", 0.5, 100, false);
        let rec = RecommendationEngine::default().recommend(&[&best, &other]).unwrap();

        assert_eq!(rec.best, "best");
        assert!(rec.best_is_ai_enhanced);
        assert!(rec.explanation.ends_with("Best copy also shows enhancement indicators."));
    }

    #[test]
    fn test_explanation_template() {
        let a = record("a", 0.9, 2048, false);
        let b = record("b", 0.88, 2048, false);
        let rec = RecommendationEngine::default().recommend(&[&a, &b]).unwrap();
        assert_eq!(
            rec.explanation,
            "Keep a.jpg (quality 0.90). 1 duplicate(s), 0 lower quality, 0 AI-enhanced; removing the others frees 2.0 KB."
        );
    }

    #[test]
    fn test_actions() {
        let a = record("a", 0.9, 10, false);
        let b = record("b", 0.2, 10, false);
        let c = record("c", 0.9, 10, true);
        let rec = RecommendationEngine::default().recommend(&[&a, &b, &c]).unwrap();

        assert_eq!(rec.action_for("a"), Some(Action::Keep));
        assert_eq!(rec.action_for("b"), Some(Action::Discard));
        assert_eq!(rec.action_for("c"), Some(Action::Flag));
        assert_eq!(rec.action_for("nope"), None);
        assert_eq!(rec.member_count(), 3);
    }

    fn copy_of(id: &str, key: &str, quality: f64, size: u64) -> AnalysisRecord {
        let item = MediaItem::new(id, format!("/lib/{id}.jpg"), MediaType::Image, size)
            .with_content_key(key);
        let hash = FixedHash::from_bits(1);
        AnalysisRecord::analyzed(
            &item,
            TechnicalMetrics {
                width: 100,
                height: 100,
                file_size: size,
                format: Some("jpg".to_string()),
            },
            MediaHashes::new(hash, hash, hash),
            QualityResult::new(quality, SubScores::uniform(quality)),
            EnhancementResult::none(),
        )
    }

    #[test]
    fn test_byte_identical_copies_are_reported() {
        let original = copy_of("/lib/a.jpg", "k1", 0.8, 500);
        let copy = copy_of("/lib/backup/a.jpg", "k1", 0.8, 500);
        let edited = copy_of("/lib/a_edit.jpg", "k2", 0.8, 400);
        let members = [&original, &copy, &edited];

        let rec = RecommendationEngine::default().recommend(&members).unwrap();
        assert_eq!(rec.best, "/lib/a.jpg");
        assert_eq!(rec.duplicates, vec!["/lib/backup/a.jpg", "/lib/a_edit.jpg"]);
        assert_eq!(rec.exact_copies, vec!["/lib/backup/a.jpg"]);
        assert!(!rec.duplicates.contains(&rec.best));
        assert_eq!(rec.action_for("/lib/backup/a.jpg"), Some(Action::Discard));
        assert!(rec.explanation.ends_with("1 byte-identical to the kept copy."));
        assert_covers(&rec, &members);
    }

    #[test]
    fn test_no_content_keys_no_exact_copies() {
        let a = record("a", 0.9, 10, false);
        let b = record("b", 0.9, 10, false);
        let rec = RecommendationEngine::default().recommend(&[&a, &b]).unwrap();
        assert!(rec.exact_copies.is_empty());
    }

    #[test]
    fn test_small_cluster_is_rejected() {
        let a = record("a", 0.9, 10, false);
        assert_eq!(
            RecommendationEngine::default().recommend(&[&a]),
            Err(RecommendError::ClusterTooSmall(1))
        );
    }

    #[test]
    fn test_unanalyzed_member_is_rejected() {
        let a = record("a", 0.9, 10, false);
        let item = MediaItem::new("broken", "/lib/broken.jpg", MediaType::Image, 10);
        let broken = AnalysisRecord::decode_failed(&item, "bad header");
        assert!(matches!(
            RecommendationEngine::default().recommend(&[&a, &broken]),
            Err(RecommendError::MissingAnalysis { .. })
        ));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_size(2 * 1024u64.pow(4)), "2.0 TB");
        assert_eq!(format_size(2048 * 1024u64.pow(4)), "2048.0 TB");
    }
}
