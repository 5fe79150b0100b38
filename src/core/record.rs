use crate::core::enhancement::EnhancementResult;
use crate::core::hash::MediaHashes;
use crate::core::image::{MediaItem, MediaType, TechnicalMetrics};
use crate::core::quality::{Metric, QualityResult};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Ok,
    DecodeError,
    Partial,
    Timeout,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Ok => "ok",
            AnalysisStatus::DecodeError => "decode_error",
            AnalysisStatus::Partial => "partial",
            AnalysisStatus::Timeout => "timeout",
        }
    }
}

/// Per-item failures. They are recovered locally and stored as the record's
/// diagnostic message; none of them aborts a batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Decode failed: {message}")]
    Decode { message: String },

    #[error("Partial analysis, unavailable metrics: {}", .metrics.join(", "))]
    Partial { metrics: Vec<String> },

    #[error("Analysis exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u128 },
}

/// Outcome of analyzing one item. Built once by the analyzer and never
/// mutated; hashes, quality and enhancement are present exactly when the
/// status is ok or partial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    identity: String,
    media_type: MediaType,
    file_name: String,
    file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_key: Option<String>,
    dimensions: Option<(u32, u32)>,
    hashes: Option<MediaHashes>,
    quality: Option<QualityResult>,
    enhancement: Option<EnhancementResult>,
    technical_metrics: Option<TechnicalMetrics>,
    status: AnalysisStatus,
    message: Option<String>,
}

impl AnalysisRecord {
    pub fn analyzed(
        item: &MediaItem,
        metrics: TechnicalMetrics,
        hashes: MediaHashes,
        quality: QualityResult,
        enhancement: EnhancementResult,
    ) -> Self {
        let (status, message) = if quality.is_partial() {
            let error = AnalysisError::Partial {
                metrics: quality
                    .unavailable
                    .iter()
                    .map(|metric: &Metric| metric.as_str().to_string())
                    .collect(),
            };
            (AnalysisStatus::Partial, Some(error.to_string()))
        } else {
            (AnalysisStatus::Ok, None)
        };

        Self {
            identity: item.identity.clone(),
            media_type: item.media_type,
            file_name: item.file_name.clone(),
            file_size: item.file_size,
            content_key: item.content_key.clone(),
            dimensions: Some((metrics.width, metrics.height)),
            hashes: Some(hashes),
            quality: Some(quality),
            enhancement: Some(enhancement),
            technical_metrics: Some(metrics),
            status,
            message,
        }
    }

    pub fn decode_failed(item: &MediaItem, message: impl Into<String>) -> Self {
        let error = AnalysisError::Decode {
            message: message.into(),
        };
        Self::failed(item, AnalysisStatus::DecodeError, error)
    }

    pub fn timed_out(item: &MediaItem, budget: Duration) -> Self {
        let error = AnalysisError::Timeout {
            budget_ms: budget.as_millis(),
        };
        Self::failed(item, AnalysisStatus::Timeout, error)
    }

    fn failed(item: &MediaItem, status: AnalysisStatus, error: AnalysisError) -> Self {
        Self {
            identity: item.identity.clone(),
            media_type: item.media_type,
            file_name: item.file_name.clone(),
            file_size: item.file_size,
            content_key: item.content_key.clone(),
            dimensions: None,
            hashes: None,
            quality: None,
            enhancement: None,
            technical_metrics: None,
            status,
            message: Some(error.to_string()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn content_key(&self) -> Option<&str> {
        self.content_key.as_deref()
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn hashes(&self) -> Option<&MediaHashes> {
        self.hashes.as_ref()
    }

    pub fn quality(&self) -> Option<&QualityResult> {
        self.quality.as_ref()
    }

    pub fn quality_score(&self) -> Option<f64> {
        self.quality.as_ref().map(|quality| quality.score)
    }

    pub fn enhancement(&self) -> Option<&EnhancementResult> {
        self.enhancement.as_ref()
    }

    pub fn is_ai_enhanced(&self) -> bool {
        self.enhancement
            .as_ref()
            .is_some_and(EnhancementResult::is_ai_enhanced)
    }

    pub fn ai_confidence(&self) -> f64 {
        self.enhancement
            .as_ref()
            .map_or(0.0, EnhancementResult::confidence)
    }

    pub fn ai_indicators(&self) -> BTreeSet<String> {
        self.enhancement
            .as_ref()
            .map(|enhancement| enhancement.indicators().clone())
            .unwrap_or_default()
    }

    pub fn technical_metrics(&self) -> Option<&TechnicalMetrics> {
        self.technical_metrics.as_ref()
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Only records carrying hashes take part in grouping.
    pub fn is_groupable(&self) -> bool {
        self.hashes.is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.status,
            AnalysisStatus::DecodeError | AnalysisStatus::Timeout
        )
    }
}
