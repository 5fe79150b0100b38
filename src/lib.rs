//! Perceptual near-duplicate clustering and quality ranking.
//!
//! `core` holds the pure analysis stages (hashing, quality, enhancement
//! detection, grouping, recommendation). `services` wires them to the
//! outside world: decoding, persistence, directory enumeration and the
//! worker pool that runs a batch.

pub mod config;
pub mod core;
pub mod services;

pub use config::{ConfigError, EngineConfig, QualityWeights};
pub use core::duplicate::{Cluster, DuplicateDetector, Partition};
pub use core::enhancement::{EnhancementDetector, EnhancementResult};
pub use core::hash::{calculate_similarity, FixedHash, HashAlgorithm, HashExtractor, MediaHashes};
pub use core::image::{MediaItem, MediaType, PixelGrid, TechnicalMetrics};
pub use core::quality::{ExtendedMetrics, Metric, QualityAssessor, QualityResult, SubScores};
pub use core::recommend::{Action, Recommendation, RecommendationEngine};
pub use core::record::{AnalysisError, AnalysisRecord, AnalysisStatus};
pub use services::pipeline::{Pipeline, PipelineError, RunReport};
