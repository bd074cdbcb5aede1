//! Gateway error taxonomy.
//!
//! Every failure surfaced to an MCP client is one of these kinds. Tool
//! calls render them into `{isError: true}` envelopes; resource reads and
//! protocol-level failures render them into JSON-RPC errors whose code is
//! the taxonomy's HTTP-ish status.

use mmg_maas_client::MaasError;
use mmg_progress::ProgressError;
use thiserror::Error;

use crate::schema::FieldError;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{}", format_field_errors(.0))]
    InvalidParameters(Vec<FieldError>),

    #[error("Authentication with MAAS failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation already exists: {0}")]
    OperationExists(String),

    #[error("Operation is finalized: {0}")]
    OperationFinalized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return "Invalid parameters".to_string();
    }
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("Invalid parameters: {}", details.join("; "))
}

impl GatewayError {
    /// Short machine-readable kind, used as the envelope prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Authentication(_) => "authentication",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::OperationExists(_) => "operation_exists",
            Self::OperationFinalized(_) => "operation_finalized",
            Self::Conflict(_) => "conflict",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::NotAcceptable(_) => "not_acceptable",
            Self::Upstream { .. } => "upstream_error",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP-ish status for the transport layer, also used as the JSON-RPC
    /// error code on resource reads.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParameters(_) => 400,
            Self::Authentication(_) => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::NotAcceptable(_) => 406,
            Self::OperationExists(_) | Self::Conflict(_) => 409,
            Self::OperationFinalized(_) => 410,
            Self::UnsupportedMediaType(_) => 415,
            Self::Upstream { status, .. } => {
                if *status >= 500 {
                    502
                } else {
                    500
                }
            }
            Self::Cancelled(_) => 499,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Field-level validation details, when present.
    pub fn field_details(&self) -> Option<&[FieldError]> {
        match self {
            Self::InvalidParameters(errors) => Some(errors),
            _ => None,
        }
    }

    /// Envelope text: `<kind>: <message>`.
    pub fn envelope_text(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<MaasError> for GatewayError {
    fn from(error: MaasError) -> Self {
        match error {
            MaasError::Status { status: 401, body } => Self::Authentication(body),
            MaasError::Status { status: 403, body } => Self::PermissionDenied(body),
            MaasError::Status { status: 404, body } => Self::NotFound(body),
            MaasError::Status { status: 409, body } => Self::Conflict(body),
            MaasError::Status { status, body } => Self::Upstream {
                status,
                message: body,
            },
            MaasError::Timeout => Self::Timeout("upstream request timed out".to_string()),
            MaasError::Cancelled => Self::Cancelled("upstream request cancelled".to_string()),
            MaasError::Decode(message) => Self::Upstream {
                status: 502,
                message: format!("undecodable upstream response: {}", message),
            },
            MaasError::Http(error) => Self::Upstream {
                status: 502,
                message: error.to_string(),
            },
            MaasError::InvalidApiKey | MaasError::InvalidUrl(_) => {
                Self::Internal(error.to_string())
            }
        }
    }
}

impl From<ProgressError> for GatewayError {
    fn from(error: ProgressError) -> Self {
        match error {
            ProgressError::OperationExists(id) => Self::OperationExists(id),
            ProgressError::OperationNotFound(id) => Self::NotFound(format!("operation {}", id)),
            ProgressError::OperationFinalized(id) => Self::OperationFinalized(id),
            ProgressError::Shutdown => Self::Internal("tracker is shut down".to_string()),
        }
    }
}
