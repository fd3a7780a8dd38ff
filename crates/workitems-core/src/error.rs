use thiserror::Error;

use crate::ports::{QueueError, StoreError};

/// Why a work item could not be processed.
///
/// The consumer only cares about three buckets: non-retriable (delete now),
/// cancelled (leave the message alone) and everything else (leave it for
/// redelivery until the retry ceiling is hit).
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("malformed work item envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("no processor registered for work item type {0}")]
    UnknownType(String),

    #[error("processor for work item type {work_item_type} could not be resolved: {reason}")]
    ProcessorUnavailable {
        work_item_type: String,
        reason: String,
    },

    #[error("failed to deserialize work item of type {work_item_type}: {source}")]
    Deserialize {
        work_item_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// Raised by a processor that knows retrying cannot help.
    #[error("non-retriable failure: {0}")]
    NonRetriable(String),

    #[error("work item processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ProcessingError {
    pub fn non_retriable(message: impl Into<String>) -> Self {
        ProcessingError::NonRetriable(message.into())
    }

    /// `false` for anything that will fail the same way on every delivery.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ProcessingError::MalformedEnvelope { .. }
                | ProcessingError::UnknownType(_)
                | ProcessingError::ProcessorUnavailable { .. }
                | ProcessingError::Deserialize { .. }
                | ProcessingError::NonRetriable(_)
                | ProcessingError::Cancelled
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessingError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::malformed(ProcessingError::MalformedEnvelope { reason: "x".into() })]
    #[case::unknown(ProcessingError::UnknownType("Nonexistent".into()))]
    #[case::unavailable(ProcessingError::ProcessorUnavailable {
        work_item_type: "A".into(),
        reason: "factory failed".into(),
    })]
    #[case::declared(ProcessingError::non_retriable("bad input"))]
    fn unroutable_and_declared_failures_are_not_retriable(#[case] err: ProcessingError) {
        assert!(!err.is_retriable());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn handler_failures_are_retriable() {
        let err = ProcessingError::from(anyhow::anyhow!("service unavailable"));
        assert!(err.is_retriable());
        assert_eq!(err.to_string(), "service unavailable");
    }

    #[test]
    fn cancellation_is_its_own_bucket() {
        let err = ProcessingError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_retriable());
    }

    #[test]
    fn unknown_type_message_names_the_type() {
        let err = ProcessingError::UnknownType("Nonexistent".into());
        assert!(err.to_string().contains("Nonexistent"));
    }
}
