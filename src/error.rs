//! Error handling for the command resolution engine
//!
//! Resolvers and matchers never raise for "not found"; they return `None`
//! and let the caller decide. The variants below are what surfaces from
//! routing, dispatch and the reasoning loop.

use isms_llm::{ModelError, ModelErrorKind};
use thiserror::Error;

use crate::store::StoreError;
use crate::types::ObjectType;

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or unparseable required parameter.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Reference could not be resolved in any container.
    #[error("{object_type} '{reference}' not found")]
    NotFound {
        object_type: ObjectType,
        reference: String,
    },

    /// No canonical subtype matched, or the platform refused a subtype change.
    #[error("Subtype '{provided}' is not valid for {object_type}")]
    SubtypeMismatch {
        object_type: ObjectType,
        provided: String,
        available: Vec<String>,
    },

    #[error("Object store error: {0}")]
    Connection(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Reasoning loop stopped after {limit} iterations without completing")]
    MaxIterationsExceeded { limit: usize },

    #[error("Another selection is still pending")]
    PendingSelectionActive,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(object_type: ObjectType, reference: impl Into<String>) -> Self {
        EngineError::NotFound {
            object_type,
            reference: reference.into(),
        }
    }

    /// Short machine tag, used in logs and structured responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::SubtypeMismatch { .. } => "subtype_mismatch",
            EngineError::Connection(_) => "connection",
            EngineError::Model(e) if e.kind == ModelErrorKind::Quota => "model_quota",
            EngineError::Model(_) => "model",
            EngineError::MaxIterationsExceeded { .. } => "max_iterations",
            EngineError::PendingSelectionActive => "pending_selection",
            EngineError::Config(_) => "config",
        }
    }

    /// Calm, user-facing guidance.
    ///
    /// Never includes tool identifiers, store payloads or model output.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation { message } => message.clone(),
            EngineError::NotFound {
                object_type,
                reference,
            } => format!(
                "I couldn't find any {} called '{}'. You can list {} to see what exists.",
                object_type,
                reference,
                object_type.plural()
            ),
            EngineError::SubtypeMismatch {
                object_type,
                provided,
                available,
            } => {
                if available.is_empty() {
                    format!(
                        "'{}' can't be applied to this {}. Its subtype can't be changed once set.",
                        provided, object_type
                    )
                } else {
                    format!(
                        "'{}' isn't a known {} subtype. Available subtypes: {}.",
                        provided,
                        object_type,
                        available.join(", ")
                    )
                }
            }
            EngineError::Connection(StoreError::Unauthorized) => {
                "I can't reach the compliance platform right now because the session is not authorized. Please sign in again and retry.".to_string()
            }
            EngineError::Connection(_) => {
                "I can't reach the compliance platform right now. Please try again in a moment."
                    .to_string()
            }
            EngineError::Model(e) if e.is_quota() => {
                "The assistant's language service is temporarily over capacity. Simple commands like 'list scopes' or 'create asset X' still work.".to_string()
            }
            EngineError::Model(_) => {
                "I had trouble understanding that request. Could you rephrase it as a direct command, for example 'create scope Alpha'?".to_string()
            }
            EngineError::MaxIterationsExceeded { .. } => {
                "That request needed more steps than I can take at once. Try splitting it into smaller commands.".to_string()
            }
            EngineError::PendingSelectionActive => {
                "Please answer the open question first, or say 'cancel' to drop it.".to_string()
            }
            EngineError::Config(_) => {
                "The assistant is not configured correctly. Please contact your administrator."
                    .to_string()
            }
        }
    }
}

impl From<String> for EngineError {
    fn from(message: String) -> Self {
        EngineError::Validation { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(EngineError::validation("x").kind(), "validation");
        assert_eq!(
            EngineError::Model(ModelError::quota("429")).kind(),
            "model_quota"
        );
        assert_eq!(
            EngineError::MaxIterationsExceeded { limit: 10 }.kind(),
            "max_iterations"
        );
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = EngineError::Connection(StoreError::Unreachable(
            "POST /veriniceTool/createObject 502".to_string(),
        ));
        let msg = err.user_message();
        assert!(!msg.contains("createObject"));
        assert!(!msg.contains("502"));

        let err = EngineError::Model(ModelError::other("{\"error\": \"tool_call failed\"}"));
        assert!(!err.user_message().contains("tool_call"));
    }

    #[test]
    fn test_not_found_message_names_reference() {
        let err = EngineError::not_found(ObjectType::Asset, "Desktop");
        let msg = err.user_message();
        assert!(msg.contains("Desktop"));
        assert!(msg.contains("assets"));
    }
}
