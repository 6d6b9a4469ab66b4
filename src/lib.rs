//! ISMS command engine
//!
//! Turns free-form requests about ISMS objects ("create scope 'Project
//! Phoenix'", "link Desktop to SCOPE1", "list assets subType IT-System")
//! into structured operations against a compliance platform.
//!
//! ## Architecture
//!
//! ```text
//! Utterance ─► IntentRouter (strategy chain) ─► RoutingDecision
//!                  ▲                                  │
//!          ShadowComparator                   CommandEngine dispatch
//!          (legacy vs layered)                 │            │
//!                                      HandlerTable   OperationExecutor
//!                                              │      (Thought→Action→Observation)
//!                                              ▼            │
//!                              EntityResolver / SubtypeMatcher ◄┘
//!                                              │
//!                                        ObjectStore
//! ```
//!
//! Cross-turn memory (created objects, the open question, the last list,
//! the routing log) lives in [`SessionContext`], passed by reference.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use isms_command_engine::{CommandEngine, EngineConfig, InMemoryStore, Utterance};
//!
//! # async fn demo() -> isms_command_engine::Result<()> {
//! let store = Arc::new(InMemoryStore::new().with_container("dom-1", "ISMS"));
//! let engine = CommandEngine::new(store, None, EngineConfig::default())?;
//! let mut session = engine.new_session();
//! let response = engine
//!     .handle(&Utterance::new("create scope named 'Project Phoenix'"), &mut session)
//!     .await;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

// Ambient
pub mod config;
pub mod error;
pub mod telemetry;

// Domain model and collaborators
pub mod session;
pub mod store;
pub mod types;

// Reference resolution
pub mod resolution;

// Routing
pub mod router;
pub mod shadow;

// Model output parsing and the reasoning loop
pub mod executor;
pub mod structured_output;

// Dispatch
pub mod engine;

pub use config::{EngineConfig, ExecutorConfig, ResolverConfig, RolloutMode, RouterConfig, ShadowConfig};
pub use engine::{CommandEngine, EngineResponse, HandlerTable, OperationHandler, ResponseStatus, Services};
pub use error::{EngineError, Result};
pub use executor::{ExecutionOutcome, ExecutionStatus, OperationExecutor, Tool, ToolRegistry};
pub use resolution::{EntityResolver, ResolvedObject, SubtypeChoice, SubtypeMatcher};
pub use router::{
    DecisionPayload, Handler, IntentRouter, LegacyRouter, Route, RouteStrategy, Router,
    RoutingDecision,
};
pub use session::{PendingSelection, SessionContext};
pub use shadow::ShadowComparator;
pub use store::{Container, InMemoryStore, NewObject, ObjectStore, StoreError, StoredObject};
pub use types::{
    ConversationContext, ObjectReference, ObjectType, Operation, OperationKind, ReportType,
    Utterance,
};

pub use isms_llm;
