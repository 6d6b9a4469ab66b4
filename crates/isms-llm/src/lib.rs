//! Language-model collaborator for the ISMS command engine
//!
//! This crate owns everything that talks to a hosted model. It has no
//! object-store dependencies - routing and execution stay in the engine.
//!
//! ## Architecture
//!
//! ```text
//! Engine → LanguageModel::generate(GenerateRequest) → provider HTTP API
//!                                 │
//!                                 └─ ModelError { kind: Quota | Auth | Blocked | Network | Other }
//! ```
//!
//! The engine only needs to distinguish quota exhaustion from every other
//! failure: quota flips the intent router onto its deterministic fallback
//! patterns instead of surfacing the error.

pub mod error;
pub mod language_model;
pub mod openai_client;

pub use error::{classify_failure, ModelError, ModelErrorKind};
pub use language_model::{GenerateRequest, LanguageModel, ResponseFormat};
pub use openai_client::OpenAiClient;
