//! # Termination Messages
//!
//! Steps report results by writing a JSON array of
//! `{"key", "value", "resourceRef", "resultType"}` objects to their
//! termination message.

use crate::crd::PipelineResourceResult;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed termination message: {0}")]
pub struct TerminationMessageError(#[from] serde_json::Error);

/// Parse a container termination message into results, sorted by key.
///
/// An empty message carries no results.
pub fn parse_termination_message(
    message: &str,
) -> Result<Vec<PipelineResourceResult>, TerminationMessageError> {
    if message.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut results: Vec<PipelineResourceResult> = serde_json::from_str(message)?;
    results.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message_has_no_results() {
        assert!(parse_termination_message("").unwrap().is_empty());
        assert!(parse_termination_message("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_results_are_sorted_by_key() {
        let results = parse_termination_message(
            r#"[{"key":"digest","value":"sha256:abc","resourceRef":{"name":"img"}},{"key":"commit","value":"deadbeef"}]"#,
        )
        .unwrap();
        assert_eq!(results[0].key, "commit");
        assert_eq!(results[1].resource_ref.as_ref().unwrap().name, "img");
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        assert!(parse_termination_message("not json").is_err());
    }
}
