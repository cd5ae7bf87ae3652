//! Stage runners and the async extraction orchestrator.

mod async_extract;
mod download;
mod extract;
mod revalidate;

pub use async_extract::{AsyncExtractService, CollectSummary, PipelineOutcome, SubmitSummary};
pub use download::{DownloadConfig, DownloadService, DownloadSummary};
pub use extract::{ExtractConfig, ExtractService, ExtractSummary};
pub use revalidate::{RevalidateService, RevalidateSummary};
