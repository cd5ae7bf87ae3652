//! Core data models for the pipeline.

mod document;
mod job;
mod message;

pub use document::{
    doc_id_for_url, DiscoveredItem, DocStatus, Document, DownloadRecord, DownloadStatus,
    ExtractionRecord, ExtractionStatus, PERMANENT_404_MARKER,
};
pub use job::{job_id_for, new_run_id, ExtractJob, JobStatus, Run, RunStatus};
pub use message::{
    ExtractRequestV1, ExtractResultV1, MessageError, RequestOptions, ResultErrorCode,
    ResultStatus, EXTRACT_REQUEST_TYPE, EXTRACT_RESULT_TYPE, MESSAGE_VERSION,
};
