use thiserror::Error;

/// Workflow error codes observable on a trace.
pub const NO_IP_AVAILABLE: i32 = -7;
pub const MISSING_SCHEDULING_INFO: i32 = -8;

/// A failure recorded on a trace. Never thrown across the pipeline boundary:
/// downstream stages run only while the trace carries no errors, and the
/// failed trace still flows to the result builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// Domain-meaningful condition with a numeric code.
    Workflow { code: i32, message: String },
    /// Any other failure: behavior rejection, unexpected result shape.
    Generic { message: String },
}

impl TraceError {
    pub fn no_ip_available() -> Self {
        TraceError::Workflow {
            code: NO_IP_AVAILABLE,
            message: "no IP available after host resolution".to_string(),
        }
    }

    pub fn missing_scheduling_info() -> Self {
        TraceError::Workflow {
            code: MISSING_SCHEDULING_INFO,
            message: "missing information for request scheduling".to_string(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        TraceError::Generic {
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            TraceError::Workflow { code, .. } => Some(*code),
            TraceError::Generic { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TraceError::Workflow { message, .. } => message,
            TraceError::Generic { message } => message,
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, TraceError::Workflow { .. })
    }
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::Workflow { code, message } => {
                write!(f, "workflow error {}: {}", code, message)
            }
            TraceError::Generic { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for TraceError {}

/// Errors surfaced by the temporary object factory itself, as opposed to
/// failures of the build action it runs.
#[derive(Debug, Clone, Error)]
pub enum FactoryError {
    #[error("no cached object for key `{0}`")]
    Missing(String),
    #[error("object for key `{0}` is still being built")]
    BuildInProgress(String),
}
