use crate::config::{EngineConfig, QualityWeights};
use crate::core::enhancement::EnhancementDetector;
use crate::core::hash::HashExtractor;
use crate::core::image::{MediaItem, TechnicalMetrics};
use crate::core::quality::QualityAssessor;
use crate::core::record::AnalysisRecord;
use crate::services::decoder::Decoder;
use crate::services::store::{AnalysisStore, StoredAnalysis};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub processed: usize,
    pub total: usize,
    pub current: String,
    pub phase: AnalysisPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisPhase {
    Analyzing,
    Complete,
}

/// Records for every item that was dispatched, in enumeration order.
#[derive(Debug, Clone)]
pub struct AnalysisBatch {
    pub records: Vec<AnalysisRecord>,
    pub cancelled: bool,
    /// Identities never dispatched because the run was cancelled.
    pub not_started: Vec<String>,
}

/// The per-item pipeline run on a blocking worker thread.
pub struct ItemAnalyzer {
    decoder: Arc<dyn Decoder>,
    store: Option<Arc<dyn AnalysisStore>>,
    hasher: HashExtractor,
    assessor: QualityAssessor,
    detector: EnhancementDetector,
}

impl ItemAnalyzer {
    pub fn new(
        decoder: Arc<dyn Decoder>,
        store: Option<Arc<dyn AnalysisStore>>,
        weights: QualityWeights,
    ) -> Self {
        Self {
            decoder,
            store,
            hasher: HashExtractor::new(),
            assessor: QualityAssessor::new(weights),
            detector: EnhancementDetector::new(),
        }
    }

    pub fn analyze(&self, item: &MediaItem) -> AnalysisRecord {
        if let Some(record) = self.cached(item) {
            return record;
        }

        let grid = match self.decoder.decode(item) {
            Ok(grid) => grid,
            Err(e) => {
                log::warn!("Failed to decode {}: {}", item.source.display(), e);
                return AnalysisRecord::decode_failed(item, e.to_string());
            }
        };

        let hashes = match self.hasher.extract(&grid) {
            Ok(hashes) => hashes,
            Err(e) => return AnalysisRecord::decode_failed(item, e.to_string()),
        };
        let metrics = TechnicalMetrics::for_item(item, &grid);
        let quality = self.assessor.assess(&grid, None);
        let enhancement = self.detector.detect(&grid, &item.file_name, &metrics);

        let record = AnalysisRecord::analyzed(item, metrics, hashes, quality, enhancement);
        self.remember(item, &record);
        record
    }

    fn cached(&self, item: &MediaItem) -> Option<AnalysisRecord> {
        let store = self.store.as_ref()?;
        match store.get(item.store_key()) {
            Ok(Some(entry)) if entry.matches(item) => {
                log::debug!("Cache hit for {}", item.identity);
                Some(entry.into_record(item, &self.assessor))
            }
            Ok(Some(_)) => {
                log::debug!("Stale cache entry for {}, size changed", item.identity);
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Store lookup failed for {}: {}", item.identity, e);
                None
            }
        }
    }

    fn remember(&self, item: &MediaItem, record: &AnalysisRecord) {
        let (Some(store), Some(entry)) = (self.store.as_ref(), StoredAnalysis::from_record(record))
        else {
            return;
        };
        if let Err(e) = store.put(item.store_key(), &entry) {
            log::warn!("Failed to store analysis for {}: {}", record.identity(), e);
        }
    }
}

/// Bounded worker pool over a batch of items.
pub struct Analyzer {
    decoder: Arc<dyn Decoder>,
    store: Option<Arc<dyn AnalysisStore>>,
    weights: QualityWeights,
    workers: usize,
    timeout: Duration,
    progress_sender: Option<mpsc::UnboundedSender<AnalysisProgress>>,
    cancellation_token: Arc<AtomicBool>,
}

impl Analyzer {
    pub fn new(config: &EngineConfig, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            decoder,
            store: None,
            weights: config.quality_weights.clone(),
            workers: config.workers.max(1),
            timeout: Duration::from_secs(config.analysis_timeout_secs),
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<AnalysisProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    pub async fn analyze_batch(&self, items: Vec<MediaItem>) -> AnalysisBatch {
        let total = items.len();
        let kit = Arc::new(ItemAnalyzer::new(
            self.decoder.clone(),
            self.store.clone(),
            self.weights.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let sink: Arc<Mutex<Vec<(usize, AnalysisRecord)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));
        let processed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        let mut not_started = Vec::new();

        log::info!("Analyzing {} items with {} workers", total, self.workers);

        let mut pending = items.into_iter().enumerate();
        while let Some((index, item)) = pending.next() {
            let permit = if self.is_cancelled() {
                None
            } else {
                semaphore.clone().acquire_owned().await.ok()
            };
            // Re-check after waiting: cancellation may have landed meanwhile.
            let permit = match permit {
                Some(permit) if !self.is_cancelled() => permit,
                _ => {
                    not_started.push(item.identity);
                    not_started.extend(pending.by_ref().map(|(_, item)| item.identity));
                    break;
                }
            };

            let kit = kit.clone();
            let sink = sink.clone();
            let processed = processed.clone();
            let progress = self.progress_sender.clone();
            let budget = self.timeout;

            tasks.spawn(async move {
                let current = item.file_name.clone();
                let record = analyze_with_budget(kit, item, permit, budget).await;

                sink.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((index, record));

                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(sender) = progress {
                    let _ = sender.send(AnalysisProgress {
                        processed: done,
                        total,
                        current,
                        phase: AnalysisPhase::Analyzing,
                    });
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Analysis task failed: {}", e);
            }
        }

        let mut completed = std::mem::take(
            &mut *sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        completed.sort_by_key(|(index, _)| *index);
        let records: Vec<AnalysisRecord> = completed.into_iter().map(|(_, record)| record).collect();

        let cancelled = self.is_cancelled() && !not_started.is_empty();
        if cancelled {
            log::info!(
                "Analysis cancelled: {} completed, {} not started",
                records.len(),
                not_started.len()
            );
        }

        self.send_progress(AnalysisProgress {
            processed: records.len(),
            total,
            current: String::new(),
            phase: AnalysisPhase::Complete,
        });

        AnalysisBatch {
            records,
            cancelled,
            not_started,
        }
    }

    fn send_progress(&self, progress: AnalysisProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

/// Runs one item on the blocking pool. An item over budget is recorded as a
/// timeout; its thread is left to finish on its own and keeps its worker
/// permit until it does, so late results still land in the store.
async fn analyze_with_budget(
    kit: Arc<ItemAnalyzer>,
    item: MediaItem,
    permit: OwnedSemaphorePermit,
    budget: Duration,
) -> AnalysisRecord {
    let worker_item = item.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        kit.analyze(&worker_item)
    });

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(record)) => record,
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                join_error.to_string()
            };
            log::error!("Analysis of {} panicked: {}", item.source.display(), message);
            AnalysisRecord::decode_failed(&item, format!("analysis panicked: {}", message))
        }
        Err(_) => {
            log::warn!(
                "Analysis of {} exceeded {} ms",
                item.source.display(),
                budget.as_millis()
            );
            AnalysisRecord::timed_out(&item, budget)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
