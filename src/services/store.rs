use crate::core::enhancement::{file_name_indicator, EnhancementResult};
use crate::core::hash::{FixedHash, MediaHashes};
use crate::core::image::{MediaItem, TechnicalMetrics};
use crate::core::quality::{QualityAssessor, QualityResult, SubScores};
use crate::core::record::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt entry for {identity}: {message}")]
    Corrupt { identity: String, message: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Everything persisted per identity. Enough to rebuild an analysis record
/// without decoding the item again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub average_hash: FixedHash,
    pub difference_hash: FixedHash,
    pub perceptual_hash: FixedHash,
    pub quality_score: f64,
    pub sub_scores: SubScores,
    pub is_ai_enhanced: bool,
    pub ai_confidence: f64,
    pub ai_indicators: BTreeSet<String>,
    pub technical_metrics: TechnicalMetrics,
}

impl StoredAnalysis {
    /// `None` for records that carry no analysis (decode failures, timeouts).
    pub fn from_record(record: &AnalysisRecord) -> Option<Self> {
        let hashes = record.hashes()?;
        let quality = record.quality()?;
        let metrics = record.technical_metrics()?;

        Some(Self {
            average_hash: hashes.average_hash,
            difference_hash: hashes.difference_hash,
            perceptual_hash: hashes.perceptual_hash,
            quality_score: quality.score,
            sub_scores: quality.sub_scores,
            is_ai_enhanced: record.is_ai_enhanced(),
            ai_confidence: record.ai_confidence(),
            ai_indicators: record.ai_indicators(),
            technical_metrics: metrics.clone(),
        })
    }

    /// A stored entry only stands in for an item whose size still matches.
    /// Entries shared by byte-identical copies must also agree on the
    /// file-name indicator, which depends on the name and not the bytes.
    pub fn matches(&self, item: &MediaItem) -> bool {
        let stored_name_indicator = self
            .ai_indicators
            .iter()
            .find(|indicator| indicator.starts_with("filename:"));
        self.technical_metrics.file_size == item.file_size
            && stored_name_indicator.map(String::as_str)
                == file_name_indicator(&item.file_name).as_deref()
    }

    /// Rebuild the record. The overall score is recombined from the stored
    /// sub-scores so a changed weight profile takes effect on cached items.
    pub fn into_record(self, item: &MediaItem, assessor: &QualityAssessor) -> AnalysisRecord {
        let hashes = MediaHashes::new(self.average_hash, self.difference_hash, self.perceptual_hash);
        let quality = QualityResult::new(assessor.combine(&self.sub_scores), self.sub_scores);
        let enhancement = EnhancementResult::new(self.ai_confidence, self.ai_indicators);
        AnalysisRecord::analyzed(item, self.technical_metrics, hashes, quality, enhancement)
    }
}

/// Persistent analysis cache keyed by identity.
pub trait AnalysisStore: Send + Sync {
    fn get(&self, identity: &str) -> Result<Option<StoredAnalysis>, StoreError>;
    fn put(&self, identity: &str, analysis: &StoredAnalysis) -> Result<(), StoreError>;
}

/// In-process store, mostly for tests and one-off runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredAnalysis>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnalysisStore for MemoryStore {
    fn get(&self, identity: &str) -> Result<Option<StoredAnalysis>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(identity).cloned())
    }

    fn put(&self, identity: &str, analysis: &StoredAnalysis) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(identity.to_string(), analysis.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn stored(bits: u64, file_size: u64) -> StoredAnalysis {
        let mut sub_scores = SubScores::uniform(0.6);
        sub_scores.noise = None;
        StoredAnalysis {
            average_hash: FixedHash::from_bits(bits),
            difference_hash: FixedHash::from_bits(bits.rotate_left(8)),
            perceptual_hash: FixedHash::from_bits(!bits),
            quality_score: 0.6,
            sub_scores,
            is_ai_enhanced: false,
            ai_confidence: 0.35,
            ai_indicators: ["filename:topaz".to_string()].into_iter().collect(),
            technical_metrics: TechnicalMetrics {
                width: 640,
                height: 480,
                file_size,
                format: Some("jpg".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::stored;
    use super::*;
    use crate::config::QualityWeights;
    use crate::core::image::MediaType;
    use crate::core::record::AnalysisStatus;

    fn item(size: u64) -> MediaItem {
        MediaItem::new("/lib/a_topaz.jpg", "/lib/a_topaz.jpg", MediaType::Image, size)
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.put("a", &stored(5, 100)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(stored(5, 100)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_record_rebuilt_from_store() {
        let record = stored(9, 2048).into_record(&item(2048), &QualityAssessor::default());

        assert_eq!(record.status(), AnalysisStatus::Partial);
        assert_eq!(record.hashes().unwrap().average_hash, FixedHash::from_bits(9));
        assert!((record.quality_score().unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(record.ai_confidence(), 0.35);
        assert!(!record.is_ai_enhanced());

        let again = StoredAnalysis::from_record(&record).unwrap();
        assert_eq!(again.average_hash, FixedHash::from_bits(9));
        assert_eq!(again.ai_indicators.len(), 1);
    }

    #[test]
    fn test_rebuild_uses_current_weights() {
        let mut entry = stored(1, 10);
        entry.sub_scores = SubScores {
            sharpness: Some(1.0),
            contrast: Some(0.0),
            noise: Some(0.0),
            compression_artifacts: Some(0.0),
            color_richness: Some(0.0),
            exposure: Some(0.0),
        };
        let sharpness_only = QualityAssessor::new(QualityWeights {
            sharpness: 1.0,
            contrast: 0.0,
            noise: 0.0,
            compression_artifacts: 0.0,
            color_richness: 0.0,
            exposure: 0.0,
        });

        let record = entry.into_record(&item(10), &sharpness_only);
        assert_eq!(record.quality_score(), Some(1.0));
    }

    #[test]
    fn test_size_mismatch_invalidates_entry() {
        let entry = stored(1, 10);
        assert!(entry.matches(&item(10)));
        assert!(!entry.matches(&item(11)));
    }

    #[test]
    fn test_copy_under_other_name_needs_fresh_verdict() {
        let entry = stored(1, 10);
        let plain = MediaItem::new("/lib/a.jpg", "/lib/a.jpg", MediaType::Image, 10)
            .with_content_key("k");
        let renamed = MediaItem::new("/lib/b_topaz.jpg", "/lib/b_topaz.jpg", MediaType::Image, 10)
            .with_content_key("k");
        assert!(!entry.matches(&plain));
        assert!(entry.matches(&renamed));

        let mut unflagged = stored(1, 10);
        unflagged.ai_indicators.clear();
        assert!(unflagged.matches(&plain));
        assert!(!unflagged.matches(&renamed));
    }

    #[test]
    fn test_failed_record_is_not_stored() {
        let record = AnalysisRecord::decode_failed(&item(10), "bad");
        assert!(StoredAnalysis::from_record(&record).is_none());
    }
}
