//! Bounded reasoning loop
//!
//! ```text
//! START → THOUGHT ─┬─ use_tool ──────────→ OBSERVATION → THOUGHT
//!                  ├─ complete ──────────→ DONE
//!                  └─ ask_clarification ─→ DONE
//! ```
//!
//! Every iteration asks the model for one JSON step. The loop stops at the
//! configured ceiling with [`ExecutionStatus::MaxIterations`]. Unparseable
//! output ends the loop as an implicit completion carrying an error, never
//! as a panic.

pub mod prompt;
pub mod sanitize;
pub mod tools;

use std::sync::Arc;

use isms_llm::{GenerateRequest, LanguageModel, ModelErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use prompt::Turn;
pub use sanitize::{sanitize_thought, truncate_chars};
pub use tools::{Tool, ToolDescriptor, ToolError, ToolOutput, ToolRegistry};

use crate::config::ExecutorConfig;
use crate::error::{EngineError, Result};
use crate::session::SessionContext;
use crate::structured_output::parse_structured;
use crate::types::ToolCallRecord;

/// One step as returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentStep {
    #[serde(default, alias = "reasoning")]
    pub thought: String,
    pub action: String,
    #[serde(default, alias = "tool_name")]
    pub tool: Option<String>,
    #[serde(default, alias = "args", alias = "arguments", alias = "tool_input")]
    pub parameters: Value,
    #[serde(default, alias = "answer", alias = "final_answer")]
    pub result: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    UseTool,
    Complete,
    AskClarification,
}

impl StepAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action.trim().to_lowercase().as_str() {
            "use_tool" | "tool" | "call_tool" => Some(StepAction::UseTool),
            "complete" | "done" | "finish" => Some(StepAction::Complete),
            "ask_clarification" | "clarify" | "ask" => Some(StepAction::AskClarification),
            _ => None,
        }
    }
}

/// Confidence for a step that did not state one.
///
/// Built from the action type, whether the named tool exists, and how much
/// reasoning the thought carries. Capped at 1.0.
pub fn synthesize_confidence(step: &AgentStep, registry: &ToolRegistry) -> f32 {
    let mut score: f32 = match StepAction::parse(&step.action) {
        Some(StepAction::Complete) => 0.8,
        Some(StepAction::UseTool) => 0.7,
        Some(StepAction::AskClarification) => 0.6,
        None => 0.3,
    };
    if StepAction::parse(&step.action) == Some(StepAction::UseTool) {
        match step.tool.as_deref() {
            Some(name) if registry.contains(name) => score += 0.1,
            _ => score -= 0.2,
        }
    }
    let len = step.thought.trim().chars().count();
    if len >= 20 {
        score += 0.1;
    }
    if len >= 80 {
        score += 0.05;
    }
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    NeedsClarification,
    Error,
    MaxIterations,
}

/// Result of one run of the loop.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Final answer, clarification question or calm error text.
    pub message: String,
    pub iterations: usize,
    pub confidence: f32,
    /// Sanitized thoughts, in order.
    pub thoughts: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Internal detail for logs; never shown to the user.
    #[serde(skip)]
    pub error: Option<String>,
    #[serde(skip)]
    pub model_error: Option<ModelErrorKind>,
}

impl ExecutionOutcome {
    fn new(status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            iterations: 0,
            confidence: 0.0,
            thoughts: Vec::new(),
            tool_calls: Vec::new(),
            error: None,
            model_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.error.is_none()
    }

    /// Convert a ceiling hit into [`EngineError::MaxIterationsExceeded`].
    pub fn into_result(self, limit: usize) -> Result<Self> {
        match self.status {
            ExecutionStatus::MaxIterations => Err(EngineError::MaxIterationsExceeded { limit }),
            _ => Ok(self),
        }
    }
}

/// Drives the model through Thought → Action → Observation.
pub struct OperationExecutor {
    model: Arc<dyn LanguageModel>,
    config: ExecutorConfig,
}

impl OperationExecutor {
    pub fn new(model: Arc<dyn LanguageModel>, config: ExecutorConfig) -> Self {
        Self { model, config }
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    /// Run `task` against `registry` until the model completes, asks, fails,
    /// or the iteration ceiling is reached.
    pub async fn run(
        &self,
        task: &str,
        registry: &ToolRegistry,
        session: &mut SessionContext,
    ) -> ExecutionOutcome {
        let system = prompt::system_prompt(registry);
        let mut history: Vec<Turn> = Vec::new();
        let mut thoughts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut confidence = 0.0;

        let finish = |mut outcome: ExecutionOutcome,
                      iterations: usize,
                      confidence: f32,
                      thoughts: Vec<String>,
                      tool_calls: Vec<ToolCallRecord>| {
            outcome.iterations = iterations;
            outcome.confidence = confidence;
            outcome.thoughts = thoughts;
            outcome.tool_calls = tool_calls;
            outcome
        };

        for iteration in 1..=self.config.max_iterations {
            let request = GenerateRequest::new(system.clone(), prompt::step_prompt(task, &history))
                .max_tokens(self.config.max_tokens)
                .json();

            let text = match self.model.generate(&request).await {
                Ok(text) => text,
                Err(e) => {
                    let message = if e.is_quota() {
                        info!(iteration, "Model quota exhausted during execution");
                        "The language service is over capacity, so I stopped before finishing. Simple commands still work."
                    } else {
                        warn!(iteration, error = %e, "Model call failed during execution");
                        "I couldn't finish that request because the language service failed."
                    };
                    let mut outcome = ExecutionOutcome::new(ExecutionStatus::Error, message);
                    outcome.error = Some(e.to_string());
                    outcome.model_error = Some(e.kind);
                    return finish(outcome, iteration, confidence, thoughts, tool_calls);
                }
            };

            let step = match parse_structured::<AgentStep>(&text, &["action"]) {
                Ok(step) => step,
                Err(e) => {
                    warn!(iteration, error = %e, "Unparseable step, completing");
                    let mut outcome = ExecutionOutcome::new(
                        ExecutionStatus::Completed,
                        "I couldn't work out the next step for that request.",
                    );
                    outcome.error = Some(e.to_string());
                    return finish(outcome, iteration, confidence, thoughts, tool_calls);
                }
            };

            let thought = sanitize_thought(&step.thought, self.config.thought_char_limit);
            confidence = step
                .confidence
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or_else(|| synthesize_confidence(&step, registry));
            debug!(iteration, action = %step.action, confidence, thought = %thought, "Step");
            thoughts.push(thought.clone());

            let Some(action) = StepAction::parse(&step.action) else {
                let mut outcome = ExecutionOutcome::new(
                    ExecutionStatus::Error,
                    "I couldn't work out the next step for that request.",
                );
                outcome.error = Some(format!("unknown action '{}'", step.action));
                return finish(outcome, iteration, confidence, thoughts, tool_calls);
            };

            match action {
                StepAction::Complete => {
                    let message = step
                        .result
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "Done.".to_string());
                    let outcome = ExecutionOutcome::new(ExecutionStatus::Completed, message);
                    return finish(outcome, iteration, confidence, thoughts, tool_calls);
                }
                StepAction::AskClarification => {
                    let question = step
                        .question
                        .or(step.result)
                        .filter(|q| !q.trim().is_empty())
                        .unwrap_or_else(|| "Could you tell me a bit more about what you need?".to_string());
                    let outcome = ExecutionOutcome::new(ExecutionStatus::NeedsClarification, question);
                    return finish(outcome, iteration, confidence, thoughts, tool_calls);
                }
                StepAction::UseTool => {
                    let name = step.tool.clone().unwrap_or_default();
                    let observation = registry.invoke(&name, step.parameters.clone(), session).await;
                    let observation = truncate_chars(&observation, self.config.observation_char_limit);
                    debug!(iteration, tool = %name, observation = %observation, "Observation");
                    tool_calls.push(ToolCallRecord {
                        iteration,
                        tool_name: name.clone(),
                        arguments: step.parameters,
                        observation_summary: truncate_chars(&observation, 200),
                    });
                    history.push(Turn {
                        thought,
                        action: format!("use_tool {}", name),
                        observation: Some(observation),
                    });
                }
            }
        }

        warn!(limit = self.config.max_iterations, "Reasoning loop hit its iteration ceiling");
        let outcome = ExecutionOutcome::new(
            ExecutionStatus::MaxIterations,
            EngineError::MaxIterationsExceeded {
                limit: self.config.max_iterations,
            }
            .user_message(),
        );
        finish(outcome, self.config.max_iterations, confidence, thoughts, tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use isms_llm::ModelError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies; repeats the last one when exhausted.
    struct Scripted {
        replies: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<std::result::Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(&self, _request: &GenerateRequest) -> std::result::Result<String, ModelError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn provider_name(&self) -> &str {
            "test"
        }
    }

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "lookup".into(),
                description: "Look up an object".into(),
                parameters: json!({"type": "object"}),
            }
        }
        async fn invoke(
            &self,
            _arguments: Value,
            _session: &mut SessionContext,
        ) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::ok("Found asset 'Desktop'"))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new().with(Arc::new(Lookup))
    }

    fn executor(model: Arc<Scripted>, max_iterations: usize) -> OperationExecutor {
        let config = ExecutorConfig {
            max_iterations,
            ..ExecutorConfig::default()
        };
        OperationExecutor::new(model, config)
    }

    #[tokio::test]
    async fn test_tool_then_complete() {
        let model = Scripted::new(vec![
            Ok(r#"{"thought": "I should look up the asset first", "action": "use_tool", "tool": "lookup", "parameters": {"name": "Desktop"}}"#.into()),
            Ok(r#"{"thought": "done", "action": "complete", "result": "Linked Desktop to Alpha."}"#.into()),
        ]);
        let outcome = executor(model, 10)
            .run("link Desktop to Alpha", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.message, "Linked Desktop to Alpha.");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].tool_name, "lookup");
    }

    #[tokio::test]
    async fn test_ceiling_terminates_loop() {
        let model = Scripted::new(vec![Ok(
            r#"{"thought": "again", "action": "use_tool", "tool": "lookup", "parameters": {}}"#.into(),
        )]);
        let outcome = executor(model.clone(), 3)
            .run("loop forever", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::MaxIterations);
        assert_eq!(*model.calls.lock().unwrap(), 3);
        assert!(matches!(
            outcome.into_result(3),
            Err(EngineError::MaxIterationsExceeded { limit: 3 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_observed_not_fatal() {
        let model = Scripted::new(vec![
            Ok(r#"{"thought": "t", "action": "use_tool", "tool": "teleport", "parameters": {}}"#.into()),
            Ok(r#"{"thought": "t", "action": "complete", "result": "ok"}"#.into()),
        ]);
        let outcome = executor(model, 10)
            .run("x", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(outcome.tool_calls[0]
            .observation_summary
            .starts_with("Error: unknown tool 'teleport'"));
    }

    #[tokio::test]
    async fn test_garbage_is_implicit_completion() {
        let model = Scripted::new(vec![Ok("I am not sure what to do.".into())]);
        let outcome = executor(model, 10)
            .run("x", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(outcome.error.is_some());
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_unknown_action_and_quota_are_errors() {
        let model = Scripted::new(vec![Ok(r#"{"thought": "t", "action": "dance"}"#.into())]);
        let outcome = executor(model, 10)
            .run("x", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Error);

        let model = Scripted::new(vec![Err(ModelError::quota("429 rate limit"))]);
        let outcome = executor(model, 10)
            .run("x", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert_eq!(outcome.model_error, Some(ModelErrorKind::Quota));
    }

    #[tokio::test]
    async fn test_clarification() {
        let model = Scripted::new(vec![Ok(
            r#"{"thought": "two scopes match", "action": "ask_clarification", "question": "Which Alpha did you mean?"}"#.into(),
        )]);
        let outcome = executor(model, 10)
            .run("x", &registry(), &mut SessionContext::new())
            .await;
        assert_eq!(outcome.status, ExecutionStatus::NeedsClarification);
        assert_eq!(outcome.message, "Which Alpha did you mean?");
    }

    #[test]
    fn test_synthesized_confidence() {
        let registry = registry();
        let step = |action: &str, tool: Option<&str>, thought: &str| AgentStep {
            thought: thought.into(),
            action: action.into(),
            tool: tool.map(String::from),
            parameters: Value::Null,
            result: None,
            question: None,
            confidence: None,
        };
        let good = synthesize_confidence(&step("use_tool", Some("lookup"), "look up the asset before linking"), &registry);
        let bad = synthesize_confidence(&step("use_tool", Some("teleport"), "x"), &registry);
        assert!(good > bad);
        let long = "x".repeat(200);
        assert!(synthesize_confidence(&step("complete", None, &long), &registry) <= 1.0);
    }
}
