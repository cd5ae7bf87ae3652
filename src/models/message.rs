//! Versioned queue message envelopes.
//!
//! Payloads cross a process (and language) boundary, so they are decoded
//! into explicit tagged types with exhaustive field validation before any
//! business logic sees them. A payload that is missing required fields,
//! carries an unknown enum value, or has the wrong version/type tag is
//! rejected outright.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Envelope version accepted by this build.
pub const MESSAGE_VERSION: &str = "v1";

/// Type tag for extraction request messages.
pub const EXTRACT_REQUEST_TYPE: &str = "tables.extract.request";

/// Type tag for extraction result messages.
pub const EXTRACT_RESULT_TYPE: &str = "tables.extract.result";

/// Message decode/validation failure.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported message version '{0}'")]
    Version(String),
    #[error("unexpected message type '{0}'")]
    Type(String),
    #[error("missing or empty required field '{0}'")]
    Field(&'static str),
}

/// Optional knobs forwarded to the table worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_from: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_to: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Extraction request, v1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequestV1 {
    pub version: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub job_id: String,
    pub run_id: String,
    pub doc_id: String,
    pub raw_pdf_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    pub attempt: u32,
    pub submitted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
}

impl ExtractRequestV1 {
    /// Decode and validate a raw payload.
    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        let msg: Self = serde_json::from_value(value.clone())?;
        if msg.version != MESSAGE_VERSION {
            return Err(MessageError::Version(msg.version));
        }
        if msg.message_type != EXTRACT_REQUEST_TYPE {
            return Err(MessageError::Type(msg.message_type));
        }
        if msg.job_id.is_empty() {
            return Err(MessageError::Field("jobId"));
        }
        if msg.doc_id.is_empty() {
            return Err(MessageError::Field("docId"));
        }
        if msg.raw_pdf_path.is_empty() {
            return Err(MessageError::Field("rawPdfPath"));
        }
        Ok(msg)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Worker-reported outcome of a table extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    NoTables,
    Failed,
}

/// Error classification for failed extractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultErrorCode {
    DependencyMissing,
    FileNotFound,
    FileAccessDenied,
    ParseError,
    WorkerException,
    Unknown,
}

impl ResultErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultErrorCode::DependencyMissing => "dependency_missing",
            ResultErrorCode::FileNotFound => "file_not_found",
            ResultErrorCode::FileAccessDenied => "file_access_denied",
            ResultErrorCode::ParseError => "parse_error",
            ResultErrorCode::WorkerException => "worker_exception",
            ResultErrorCode::Unknown => "unknown",
        }
    }
}

/// Extraction result, v1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResultV1 {
    pub version: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub job_id: String,
    pub doc_id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ResultErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub finished_at: String,
}

impl ExtractResultV1 {
    /// Decode and validate a raw payload.
    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        let msg: Self = serde_json::from_value(value.clone())?;
        if msg.version != MESSAGE_VERSION {
            return Err(MessageError::Version(msg.version));
        }
        if msg.message_type != EXTRACT_RESULT_TYPE {
            return Err(MessageError::Type(msg.message_type));
        }
        if msg.job_id.is_empty() {
            return Err(MessageError::Field("jobId"));
        }
        if msg.doc_id.is_empty() {
            return Err(MessageError::Field("docId"));
        }
        Ok(msg)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Human-readable error string with the error code embedded, suitable
    /// for the document's stored error field.
    pub fn error_summary(&self) -> Option<String> {
        match self.status {
            ResultStatus::Failed => {
                let code = self
                    .error_code
                    .unwrap_or(ResultErrorCode::Unknown)
                    .as_str();
                Some(match &self.error {
                    Some(detail) => format!("{}: {}", code, detail),
                    None => code.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> Value {
        json!({
            "version": "v1",
            "type": "tables.extract.result",
            "jobId": "j1",
            "docId": "d1",
            "status": "failed",
            "errorCode": "file_not_found",
            "error": "raw pdf not found",
            "finishedAt": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_result_decodes_and_summarizes_error() {
        let msg = ExtractResultV1::from_value(&sample_result()).unwrap();
        assert_eq!(msg.status, ResultStatus::Failed);
        assert_eq!(
            msg.error_summary().unwrap(),
            "file_not_found: raw pdf not found"
        );
    }

    #[test]
    fn test_result_rejects_missing_status() {
        let mut value = sample_result();
        value.as_object_mut().unwrap().remove("status");
        assert!(ExtractResultV1::from_value(&value).is_err());
    }

    #[test]
    fn test_result_rejects_unknown_enum_value() {
        let mut value = sample_result();
        value["status"] = json!("exploded");
        assert!(ExtractResultV1::from_value(&value).is_err());
    }

    #[test]
    fn test_result_rejects_wrong_type_tag() {
        let mut value = sample_result();
        value["type"] = json!("tables.extract.request");
        assert!(matches!(
            ExtractResultV1::from_value(&value),
            Err(MessageError::Type(_))
        ));
    }

    #[test]
    fn test_request_round_trip_and_validation() {
        let req = ExtractRequestV1 {
            version: MESSAGE_VERSION.to_string(),
            message_type: EXTRACT_REQUEST_TYPE.to_string(),
            job_id: "j1".to_string(),
            run_id: "run-1".to_string(),
            doc_id: "d1".to_string(),
            raw_pdf_path: "/r/d1.pdf".to_string(),
            file_sha256: Some("abc".to_string()),
            attempt: 1,
            submitted_at: "2026-01-01T00:00:00Z".to_string(),
            options: None,
        };
        let value = req.to_value();
        assert_eq!(value["jobId"], "j1");
        assert_eq!(value["rawPdfPath"], "/r/d1.pdf");
        let decoded = ExtractRequestV1::from_value(&value).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_request_rejects_empty_job_id() {
        let mut value = json!({
            "version": "v1",
            "type": "tables.extract.request",
            "jobId": "",
            "runId": "r",
            "docId": "d",
            "rawPdfPath": "/p",
            "attempt": 1,
            "submittedAt": "2026-01-01T00:00:00Z"
        });
        assert!(matches!(
            ExtractRequestV1::from_value(&value),
            Err(MessageError::Field("jobId"))
        ));
        value["jobId"] = json!("j");
        assert!(ExtractRequestV1::from_value(&value).is_ok());
    }
}
