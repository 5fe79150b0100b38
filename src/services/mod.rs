pub mod analyzer;
pub mod content_hash;
pub mod database;
pub mod decoder;
pub mod pipeline;
pub mod scanner;
pub mod store;

pub use analyzer::{AnalysisBatch, AnalysisPhase, AnalysisProgress, Analyzer};
pub use content_hash::ContentHasher;
pub use database::{SledStore, SqliteStore};
pub use decoder::{DecodeError, Decoder, FfmpegFrameDecoder, ImageDecoder, MediaDecoder};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use scanner::{IdentityMode, MediaScanner, ScanOptions};
pub use store::{AnalysisStore, MemoryStore, StoreError, StoredAnalysis};
