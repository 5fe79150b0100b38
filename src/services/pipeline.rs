use crate::config::{ConfigError, EngineConfig};
use crate::core::duplicate::{DuplicateDetector, GroupError};
use crate::core::image::{MediaItem, MediaType};
use crate::core::recommend::{Recommendation, RecommendError, RecommendationEngine};
use crate::core::record::{AnalysisRecord, AnalysisStatus};
use crate::services::analyzer::{AnalysisProgress, Analyzer};
use crate::services::decoder::Decoder;
use crate::services::store::AnalysisStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Grouping error: {0}")]
    Group(#[from] GroupError),

    #[error("Recommendation error: {0}")]
    Recommend(#[from] RecommendError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub identity: String,
    pub status: AnalysisStatus,
    pub message: Option<String>,
}

impl ReportEntry {
    fn from_record(record: &AnalysisRecord) -> Self {
        Self {
            identity: record.identity().to_string(),
            status: record.status(),
            message: record.message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub identity: String,
    pub file_size: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub media_type: MediaType,
    pub members: Vec<String>,
    pub min_similarity: f64,
    pub recommendation: Recommendation,
}

/// Everything one run produced. Analysis errors are listed apart from the
/// clustering results.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub similarity_threshold: f64,
    pub clusters: Vec<ClusterReport>,
    pub singletons: Vec<String>,
    pub errors: Vec<ReportEntry>,
    pub partial: Vec<ReportEntry>,
    pub skipped: Vec<SkippedItem>,
    pub not_started: Vec<String>,
    pub total_potential_savings: u64,
    pub cancelled: bool,
    pub records: Vec<AnalysisRecord>,
}

impl RunReport {
    pub fn cluster_containing(&self, identity: &str) -> Option<&ClusterReport> {
        self.clusters
            .iter()
            .find(|cluster| cluster.members.iter().any(|member| member == identity))
    }

    pub fn record(&self, identity: &str) -> Option<&AnalysisRecord> {
        self.records.iter().find(|record| record.identity() == identity)
    }
}

/// Analyze, group and recommend over one batch.
pub struct Pipeline {
    config: EngineConfig,
    analyzer: Analyzer,
    detector: DuplicateDetector,
    recommender: RecommendationEngine,
}

impl Pipeline {
    /// Fails on an invalid configuration before any work starts.
    pub fn new(config: EngineConfig, decoder: Arc<dyn Decoder>) -> Result<Self, PipelineError> {
        config.validate()?;
        let detector = DuplicateDetector::new(config.similarity_threshold)?;
        let recommender = RecommendationEngine::new(config.duplicate_quality_tolerance);
        let analyzer = Analyzer::new(&config, decoder);

        Ok(Self {
            config,
            analyzer,
            detector,
            recommender,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.analyzer = self.analyzer.with_store(store);
        self
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<AnalysisProgress>) -> Self {
        self.analyzer = self.analyzer.with_progress_sender(sender);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.analyzer = self.analyzer.with_timeout(timeout);
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.analyzer.cancellation_token()
    }

    pub fn cancel(&self) {
        self.analyzer.cancel();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, items: Vec<MediaItem>) -> Result<RunReport, PipelineError> {
        let (items, skipped): (Vec<MediaItem>, Vec<MediaItem>) = items
            .into_iter()
            .partition(|item| item.file_size >= self.config.min_file_size);
        let skipped: Vec<SkippedItem> = skipped
            .into_iter()
            .map(|item| SkippedItem {
                identity: item.identity,
                file_size: item.file_size,
                reason: format!("smaller than {} bytes", self.config.min_file_size),
            })
            .collect();

        let batch = self.analyzer.analyze_batch(items).await;
        let records = batch.records;
        let partition = self.detector.group(&records);

        let mut clusters = Vec::with_capacity(partition.clusters.len());
        for cluster in &partition.clusters {
            let recommendation = self.recommender.recommend_cluster(cluster, &records)?;
            clusters.push(ClusterReport {
                media_type: cluster.media_type,
                members: cluster
                    .records(&records)
                    .iter()
                    .map(|record| record.identity().to_string())
                    .collect(),
                min_similarity: cluster.min_similarity,
                recommendation,
            });
        }

        let singletons = partition
            .singletons
            .iter()
            .map(|&index| records[index].identity().to_string())
            .collect();
        let errors: Vec<ReportEntry> = records
            .iter()
            .filter(|record| record.is_error())
            .map(ReportEntry::from_record)
            .collect();
        let partial: Vec<ReportEntry> = records
            .iter()
            .filter(|record| record.status() == AnalysisStatus::Partial)
            .map(ReportEntry::from_record)
            .collect();
        let total_potential_savings = clusters
            .iter()
            .map(|cluster| cluster.recommendation.potential_savings)
            .sum();

        log::info!(
            "Run complete: {} records, {} clusters, {} errors, {} skipped",
            records.len(),
            clusters.len(),
            errors.len(),
            skipped.len()
        );

        Ok(RunReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            similarity_threshold: self.config.similarity_threshold,
            clusters,
            singletons,
            errors,
            partial,
            skipped,
            not_started: batch.not_started,
            total_potential_savings,
            cancelled: batch.cancelled,
            records,
        })
    }
}
