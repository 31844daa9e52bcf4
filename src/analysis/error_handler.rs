//! Bounded error handling for analysis fan-outs
//!
//! Per-language failures during an analysis are recorded into the
//! request's metadata and tolerated until either an absolute cap or an
//! error-rate threshold is crossed.

use crate::analysis::types::{AnalysisError, AnalysisMetadata};
use crate::error::BridgeError;

/// What the caller should do after recording an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    Continue,
    Stop,
}

/// Policy for how many failures an analysis may absorb.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    /// Absolute cap on recorded errors.
    pub max_errors: usize,
    /// Whether an in-bounds error lets the analysis continue.
    pub continue_on_error: bool,
    /// Stop once `errors / (files_scanned + errors)` exceeds this.
    pub error_threshold: f64,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self {
            max_errors: 10,
            continue_on_error: true,
            error_threshold: 0.5,
        }
    }
}

impl ErrorHandler {
    pub fn new(max_errors: usize, continue_on_error: bool, error_threshold: f64) -> Self {
        Self {
            max_errors,
            continue_on_error,
            error_threshold,
        }
    }

    /// Record an error into the metadata and decide whether the analysis
    /// may proceed.
    pub fn handle(
        &self,
        err: &BridgeError,
        context: &str,
        metadata: &mut AnalysisMetadata,
    ) -> ErrorDecision {
        tracing::warn!("Analysis error in {}: {}", context, err);
        metadata.errors.push(AnalysisError {
            language: None,
            context: Some(context.to_string()),
            message: err.to_string(),
            error_type: "error".to_string(),
        });

        if metadata.errors.len() >= self.max_errors {
            tracing::warn!(
                "Stopping analysis: {} errors reached the cap of {}",
                metadata.errors.len(),
                self.max_errors
            );
            return ErrorDecision::Stop;
        }

        let errors = metadata.errors.len() as f64;
        let error_rate = errors / (metadata.files_scanned as f64 + errors);
        if error_rate > self.error_threshold {
            tracing::warn!(
                "Stopping analysis: error rate {:.2} over threshold {:.2}",
                error_rate,
                self.error_threshold
            );
            return ErrorDecision::Stop;
        }

        if self.continue_on_error {
            ErrorDecision::Continue
        } else {
            ErrorDecision::Stop
        }
    }

    /// Whether the metadata still has headroom for more errors.
    pub fn should_continue(&self, metadata: &AnalysisMetadata) -> bool {
        metadata.errors.len() < self.max_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(files_scanned: usize) -> AnalysisMetadata {
        AnalysisMetadata {
            files_scanned,
            ..Default::default()
        }
    }

    #[test]
    fn test_stops_at_max_errors() {
        let handler = ErrorHandler::new(3, true, 1.0);
        let mut metadata = metadata_with(100);

        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "go", &mut metadata),
            ErrorDecision::Continue
        );
        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "go", &mut metadata),
            ErrorDecision::Continue
        );
        // Third error reaches the cap.
        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "go", &mut metadata),
            ErrorDecision::Stop
        );
        assert_eq!(metadata.errors.len(), 3);
        assert!(!handler.should_continue(&metadata));
    }

    #[test]
    fn test_stops_over_error_rate_threshold() {
        let handler = ErrorHandler::new(100, true, 0.25);
        let mut metadata = metadata_with(2);

        // 1 error / (2 + 1) = 0.33 > 0.25
        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "ts", &mut metadata),
            ErrorDecision::Stop
        );
    }

    #[test]
    fn test_rate_under_threshold_continues() {
        let handler = ErrorHandler::new(100, true, 0.5);
        let mut metadata = metadata_with(9);

        // 1 / 10 = 0.1 <= 0.5
        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "py", &mut metadata),
            ErrorDecision::Continue
        );
    }

    #[test]
    fn test_continue_on_error_false_stops_immediately() {
        let handler = ErrorHandler::new(100, false, 1.0);
        let mut metadata = metadata_with(100);

        assert_eq!(
            handler.handle(&BridgeError::Cancelled, "go", &mut metadata),
            ErrorDecision::Stop
        );
        // The error is still recorded.
        assert_eq!(metadata.errors.len(), 1);
    }

    #[test]
    fn test_should_continue_tracks_headroom() {
        let handler = ErrorHandler::new(2, true, 1.0);
        let mut metadata = metadata_with(10);
        assert!(handler.should_continue(&metadata));

        handler.handle(&BridgeError::Cancelled, "go", &mut metadata);
        assert!(handler.should_continue(&metadata));

        handler.handle(&BridgeError::Cancelled, "go", &mut metadata);
        assert!(!handler.should_continue(&metadata));
    }

    #[test]
    fn test_error_message_recorded_verbatim() {
        let handler = ErrorHandler::default();
        let mut metadata = metadata_with(10);
        let err = BridgeError::ExternalLsp {
            code: -32000,
            message: "index not ready".to_string(),
        };
        handler.handle(&err, "rust", &mut metadata);
        assert_eq!(
            metadata.errors[0].message,
            "language server error -32000: index not ready"
        );
        assert_eq!(metadata.errors[0].error_type, "error");
    }
}
