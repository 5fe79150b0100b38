use crate::core::hash::{similarity_from_distance, HashAlgorithm, MediaHashes};
use crate::core::image::MediaType;
use crate::core::record::AnalysisRecord;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

// Below this batch size the plain scan is cheaper than building an index.
const INDEX_MIN_BATCH: usize = 64;
// Past this many tolerated bits the chunks get too narrow to prune anything.
const INDEX_MAX_DISTANCE: u32 = 15;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupError {
    #[error("Similarity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// A seed plus every unclaimed record of the same media type whose best
/// hash similarity to the seed met the threshold. Indices point into the
/// batch that was grouped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub seed: usize,
    pub media_type: MediaType,
    pub members: Vec<usize>,
    /// Lowest member-to-seed similarity.
    pub min_similarity: f64,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn records<'a>(&self, batch: &'a [AnalysisRecord]) -> Vec<&'a AnalysisRecord> {
        self.members.iter().filter_map(|&index| batch.get(index)).collect()
    }
}

/// Result of grouping one batch: clusters of two or more, singletons, and
/// the records that could not take part.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Partition {
    pub clusters: Vec<Cluster>,
    pub singletons: Vec<usize>,
    pub excluded: Vec<usize>,
}

impl Partition {
    /// True when every index in `0..len` appears exactly once.
    pub fn check(&self, len: usize) -> bool {
        let mut seen = vec![0u32; len];
        let all = self
            .clusters
            .iter()
            .flat_map(|cluster| cluster.members.iter())
            .chain(self.singletons.iter())
            .chain(self.excluded.iter());
        for &index in all {
            match seen.get_mut(index) {
                Some(count) => *count += 1,
                None => return false,
            }
        }
        seen.iter().all(|&count| count == 1)
    }
}

pub struct DuplicateDetector {
    threshold: f64,
}

impl DuplicateDetector {
    pub fn new(threshold: f64) -> Result<Self, GroupError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(GroupError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Greedy seed-and-claim grouping in batch order. Large batches with a
    /// tight threshold go through a chunk index first; the result is the same.
    pub fn group(&self, records: &[AnalysisRecord]) -> Partition {
        let max_distance = self.max_distance();
        let index = if records.len() >= INDEX_MIN_BATCH && max_distance <= INDEX_MAX_DISTANCE {
            log::debug!(
                "Grouping {} records through chunk index (max distance {})",
                records.len(),
                max_distance
            );
            Some(ChunkIndex::build(records, max_distance))
        } else {
            None
        };
        self.group_with(records, index.as_ref())
    }

    fn group_with(&self, records: &[AnalysisRecord], index: Option<&ChunkIndex>) -> Partition {
        let mut partition = Partition::default();
        let mut claimed = vec![false; records.len()];

        for (i, record) in records.iter().enumerate() {
            if !record.is_groupable() {
                claimed[i] = true;
                partition.excluded.push(i);
            }
        }

        for seed in 0..records.len() {
            if claimed[seed] {
                continue;
            }
            claimed[seed] = true;

            let seed_record = &records[seed];
            let Some(seed_hashes) = seed_record.hashes() else {
                continue;
            };

            let candidates: Vec<usize> = match index {
                Some(index) => index.candidates(seed, seed_hashes),
                None => (seed + 1..records.len()).collect(),
            };

            let mut members = vec![seed];
            let mut min_similarity = 1.0f64;
            for candidate in candidates {
                if claimed[candidate] {
                    continue;
                }
                let other = &records[candidate];
                if other.media_type() != seed_record.media_type() {
                    continue;
                }
                let Some(other_hashes) = other.hashes() else {
                    continue;
                };

                let similarity = seed_hashes.best_similarity(other_hashes);
                if similarity >= self.threshold {
                    claimed[candidate] = true;
                    members.push(candidate);
                    min_similarity = min_similarity.min(similarity);
                }
            }

            if members.len() >= 2 {
                members.sort_unstable();
                partition.clusters.push(Cluster {
                    seed,
                    media_type: seed_record.media_type(),
                    members,
                    min_similarity,
                });
            } else {
                partition.singletons.push(seed);
            }
        }

        partition
    }

    /// Largest Hamming distance that still meets the threshold.
    fn max_distance(&self) -> u32 {
        (0..=64u32)
            .take_while(|&distance| similarity_from_distance(distance) >= self.threshold)
            .last()
            .unwrap_or(0)
    }
}

/// Pigeonhole index: with at most `d` differing bits, two hashes agree on at
/// least one of `d + 1` contiguous chunks.
struct ChunkIndex {
    chunks: Vec<(u32, u32)>,
    buckets: HashMap<(HashAlgorithm, usize, u64), Vec<usize>>,
}

impl ChunkIndex {
    fn build(records: &[AnalysisRecord], max_distance: u32) -> Self {
        let chunks = chunk_bounds(max_distance + 1);
        let mut buckets: HashMap<(HashAlgorithm, usize, u64), Vec<usize>> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            let Some(hashes) = record.hashes() else {
                continue;
            };
            for algorithm in HashAlgorithm::ALL {
                let bits = hashes.get(algorithm).bits();
                for (chunk, &(start, len)) in chunks.iter().enumerate() {
                    buckets
                        .entry((algorithm, chunk, chunk_value(bits, start, len)))
                        .or_default()
                        .push(i);
                }
            }
        }

        Self { chunks, buckets }
    }

    /// Later indices sharing at least one chunk with the seed, ascending.
    fn candidates(&self, seed: usize, hashes: &MediaHashes) -> Vec<usize> {
        let mut found = Vec::new();
        for algorithm in HashAlgorithm::ALL {
            let bits = hashes.get(algorithm).bits();
            for (chunk, &(start, len)) in self.chunks.iter().enumerate() {
                if let Some(bucket) = self.buckets.get(&(algorithm, chunk, chunk_value(bits, start, len))) {
                    found.extend(bucket.iter().copied().filter(|&i| i > seed));
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }
}

/// `(start_bit, length)` pairs covering 64 bits in `count` near-equal chunks.
fn chunk_bounds(count: u32) -> Vec<(u32, u32)> {
    let base = 64 / count;
    let extra = 64 % count;
    let mut start = 0;
    (0..count)
        .map(|i| {
            let len = base + u32::from(i < extra);
            let bounds = (start, len);
            start += len;
            bounds
        })
        .collect()
}

fn chunk_value(bits: u64, start: u32, len: u32) -> u64 {
    let shifted = bits >> start;
    if len >= 64 {
        shifted
    } else {
        shifted & ((1u64 << len) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enhancement::EnhancementResult;
    use crate::core::hash::FixedHash;
    use crate::core::image::{MediaItem, TechnicalMetrics};
    use crate::core::quality::{QualityResult, SubScores};
    use proptest::prelude::*;

    fn record(id: &str, bits: u64, media_type: MediaType) -> AnalysisRecord {
        let item = MediaItem::new(id, id, media_type, 2048);
        let hash = FixedHash::from_bits(bits);
        AnalysisRecord::analyzed(
            &item,
            TechnicalMetrics {
                width: 8,
                height: 8,
                file_size: 2048,
                format: None,
            },
            MediaHashes::new(hash, hash, hash),
            QualityResult::new(0.5, SubScores::uniform(0.5)),
            EnhancementResult::none(),
        )
    }

    fn failed(id: &str) -> AnalysisRecord {
        let item = MediaItem::new(id, id, MediaType::Image, 2048);
        AnalysisRecord::decode_failed(&item, "unsupported")
    }

    fn detector(threshold: f64) -> DuplicateDetector {
        DuplicateDetector::new(threshold).unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(DuplicateDetector::new(0.0).is_err());
        assert!(DuplicateDetector::new(1.01).is_err());
        assert!(DuplicateDetector::new(f64::NAN).is_err());
        assert!(DuplicateDetector::new(1.0).is_ok());
    }

    #[test]
    fn test_identical_hashes_group_together() {
        let batch = vec![
            record("a", 0xffff_0000_ffff_0000, MediaType::Image),
            record("b", 0x0123_4567_89ab_cdef, MediaType::Image),
            record("c", 0xffff_0000_ffff_0000, MediaType::Image),
        ];
        let partition = detector(0.9).group(&batch);

        assert_eq!(partition.clusters.len(), 1);
        assert_eq!(partition.clusters[0].members, vec![0, 2]);
        assert_eq!(partition.clusters[0].min_similarity, 1.0);
        assert_eq!(partition.singletons, vec![1]);
        assert!(partition.check(batch.len()));
    }

    #[test]
    fn test_one_bit_apart_respects_threshold() {
        let batch = vec![
            record("a", 0b1000, MediaType::Image),
            record("b", 0b1001, MediaType::Image),
        ];
        // 1 - 1/64 = 0.984375
        assert_eq!(detector(0.95).group(&batch).clusters.len(), 1);
        assert_eq!(detector(0.99).group(&batch).clusters.len(), 0);
    }

    #[test]
    fn test_media_types_never_mix() {
        let batch = vec![
            record("photo", 42, MediaType::Image),
            record("clip", 42, MediaType::Video),
        ];
        let partition = detector(0.9).group(&batch);
        assert!(partition.clusters.is_empty());
        assert_eq!(partition.singletons, vec![0, 1]);
    }

    #[test]
    fn test_failed_records_are_excluded() {
        let batch = vec![
            record("a", 7, MediaType::Image),
            failed("broken"),
            record("c", 7, MediaType::Image),
        ];
        let partition = detector(0.9).group(&batch);

        assert_eq!(partition.excluded, vec![1]);
        assert_eq!(partition.clusters[0].members, vec![0, 2]);
        assert!(partition.check(batch.len()));
    }

    #[test]
    fn test_first_seed_claims_members() {
        // b is close to both a and c; a seeds first and claims b
        let a = 0u64;
        let b = 0b1111u64;
        let c = 0xffu64;
        let batch = vec![
            record("a", a, MediaType::Image),
            record("b", b, MediaType::Image),
            record("c", c, MediaType::Image),
        ];
        let partition = detector(0.93).group(&batch);

        assert_eq!(partition.clusters.len(), 1);
        assert_eq!(partition.clusters[0].members, vec![0, 1]);
        assert_eq!(partition.singletons, vec![2]);
    }

    #[test]
    fn test_cluster_records_follow_members() {
        let batch = vec![
            record("a", 1, MediaType::Image),
            record("b", 1, MediaType::Image),
        ];
        let partition = detector(0.9).group(&batch);
        let ids: Vec<&str> = partition.clusters[0]
            .records(&batch)
            .iter()
            .map(|record| record.identity())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_max_distance_matches_similarity() {
        assert_eq!(detector(1.0).max_distance(), 0);
        assert_eq!(detector(0.875).max_distance(), 8);
        assert_eq!(detector(0.88).max_distance(), 7);
    }

    #[test]
    fn test_chunk_bounds_cover_all_bits() {
        for count in 1..=16 {
            let bounds = chunk_bounds(count);
            assert_eq!(bounds.len(), count as usize);
            assert_eq!(bounds.iter().map(|&(_, len)| len).sum::<u32>(), 64);
            assert_eq!(bounds[0].0, 0);
        }
        assert_eq!(chunk_value(u64::MAX, 0, 64), u64::MAX);
        assert_eq!(chunk_value(0xf0, 4, 4), 0xf);
    }

    #[test]
    fn test_grouping_is_repeatable() {
        let batch: Vec<AnalysisRecord> = (0..80u64)
            .map(|i| record(&format!("r{i}"), (i % 5) * 0x0101_0101 ^ (1 << (i % 64)), MediaType::Image))
            .collect();
        let first = detector(0.9).group(&batch);
        let second = detector(0.9).group(&batch);
        assert_eq!(first, second);
        assert!(first.check(batch.len()));
    }

    const BASES: [u64; 4] = [
        0x0000_0000_0000_0000,
        0xffff_ffff_0000_0000,
        0x0f0f_0f0f_0f0f_0f0f,
        0xaaaa_5555_aaaa_5555,
    ];

    proptest! {
        #[test]
        fn indexed_grouping_matches_plain_scan(
            items in proptest::collection::vec((0usize..4, 0u32..64, 0u32..64, any::<bool>()), 64..96),
            threshold in prop_oneof![Just(0.85), Just(0.9), Just(0.95), Just(1.0)],
        ) {
            let batch: Vec<AnalysisRecord> = items
                .iter()
                .enumerate()
                .map(|(i, &(base, f1, f2, video))| {
                    let media_type = if video { MediaType::Video } else { MediaType::Image };
                    record(&format!("r{i}"), BASES[base] ^ (1 << f1) ^ (1 << f2), media_type)
                })
                .collect();

            let detector = detector(threshold);
            let index = ChunkIndex::build(&batch, detector.max_distance());
            let indexed = detector.group_with(&batch, Some(&index));
            let plain = detector.group_with(&batch, None);

            prop_assert_eq!(&indexed, &plain);
            prop_assert!(plain.check(batch.len()));
        }
    }
}
