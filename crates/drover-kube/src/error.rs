//! Error types for drover-kube

use thiserror::Error;

/// Result type for drover-kube operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while reconciling a parent object
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Decision hook call failed
    #[error("decision hook failed: {0}")]
    Hook(String),

    /// Three-way merge or field path error
    #[error("apply error: {0}")]
    Apply(String),

    /// Adoption was refused because the parent re-check failed
    #[error("can't adopt {kind} {object}: {reason}")]
    AdoptionRefused {
        kind: String,
        object: String,
        reason: String,
    },

    /// The object an update targeted was deleted or replaced mid-flight
    #[error("can't update {kind} {object}: original object is gone: {message}")]
    ObjectGone {
        kind: String,
        object: String,
        message: String,
    },

    /// A desired child returned by the hook is unusable
    #[error("invalid desired child {object}: {message}")]
    InvalidChild { object: String, message: String },

    /// The server does not know the requested resource
    #[error("no server-side resource for '{resource}' in apiVersion '{api_version}'")]
    UnknownResource {
        api_version: String,
        resource: String,
    },

    /// Invalid controller configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Several child operations failed in one pass
    #[error("{}", format_error_list(.0))]
    Aggregate(Vec<SyncError>),
}

fn format_error_list(errors: &[SyncError]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} error(s) occurred: [{}]", errors.len(), messages.join("; "))
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<drover_core::CoreError> for SyncError {
    fn from(e: drover_core::CoreError) -> Self {
        SyncError::Apply(e.to_string())
    }
}

impl From<drover_hooks::HookError> for SyncError {
    fn from(e: drover_hooks::HookError) -> Self {
        SyncError::Hook(e.to_string())
    }
}

impl SyncError {
    /// Collapse a list of errors into zero, one, or an aggregate error
    pub fn aggregate(mut errors: Vec<SyncError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SyncError::Aggregate(errors)),
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is an optimistic concurrency conflict (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Api(kube::Error::Api(resp))
            if resp.code == 409 && resp.reason != "AlreadyExists")
    }

    /// Check if this is a 409 from creating an object that already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SyncError::Api(kube::Error::Api(resp))
            if resp.code == 409 && resp.reason == "AlreadyExists")
    }

    /// Check if the target object vanished while we were working on it
    pub fn is_object_gone(&self) -> bool {
        self.is_not_found() || matches!(self, SyncError::ObjectGone { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> SyncError {
        SyncError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("test {reason}"),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(409, "Conflict").is_not_found());
        assert!(!SyncError::InvalidConfig("x".to_string()).is_not_found());
    }

    #[test]
    fn test_conflict_vs_already_exists() {
        let conflict = api_error(409, "Conflict");
        assert!(conflict.is_conflict());
        assert!(!conflict.is_already_exists());

        let exists = api_error(409, "AlreadyExists");
        assert!(exists.is_already_exists());
        assert!(!exists.is_conflict());
    }

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(SyncError::aggregate(vec![]).is_ok());
    }

    #[test]
    fn test_aggregate_single_unwraps() {
        let err = SyncError::aggregate(vec![SyncError::InvalidConfig("one".to_string())])
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_aggregate_many_joins_messages() {
        let err = SyncError::aggregate(vec![
            SyncError::InvalidConfig("first".to_string()),
            SyncError::Serialization("second".to_string()),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 error(s)"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }

    #[test]
    fn test_object_gone_covers_both_shapes() {
        assert!(api_error(404, "NotFound").is_object_gone());
        let gone = SyncError::ObjectGone {
            kind: "Pod".to_string(),
            object: "default/web".to_string(),
            message: "got uid b, want uid a".to_string(),
        };
        assert!(gone.is_object_gone());
        assert!(!api_error(409, "Conflict").is_object_gone());
    }
}
