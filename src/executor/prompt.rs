//! Prompt assembly for the reasoning loop.

use super::tools::ToolRegistry;

const RESPONSE_FORMAT: &str = r#"Respond with exactly one JSON object and nothing else:
{
  "thought": "<what you know and what you will do next>",
  "action": "use_tool" | "complete" | "ask_clarification",
  "tool": "<tool name, only for use_tool>",
  "parameters": { <tool arguments, only for use_tool> },
  "result": "<final answer for the user, only for complete>",
  "question": "<question for the user, only for ask_clarification>",
  "confidence": <0.0-1.0>
}"#;

/// System prompt listing the registered tools and the step format.
pub fn system_prompt(registry: &ToolRegistry) -> String {
    format!(
        "You carry out requests on an ISMS compliance platform by calling tools one at a time.\n\
         Look objects up before linking or comparing them. When every step has succeeded, complete \
         with a short summary. If the request is ambiguous, ask one clarification question.\n\n\
         ## Tools\n\n{}## Response format\n\n{}",
        registry.reference(),
        RESPONSE_FORMAT
    )
}

/// One completed iteration, as replayed to the model.
#[derive(Debug, Clone)]
pub struct Turn {
    pub thought: String,
    pub action: String,
    pub observation: Option<String>,
}

/// The per-iteration user prompt: the task and everything done so far.
pub fn step_prompt(task: &str, history: &[Turn]) -> String {
    let mut out = format!("Task: {}\n", task);
    if history.is_empty() {
        out.push_str("\nNo steps taken yet.\n");
    }
    for (i, turn) in history.iter().enumerate() {
        out.push_str(&format!(
            "\nStep {}\nThought: {}\nAction: {}\n",
            i + 1,
            turn.thought,
            turn.action
        ));
        if let Some(obs) = &turn.observation {
            out.push_str(&format!("Observation: {}\n", obs));
        }
    }
    out.push_str("\nWhat is the next step?");
    out
}
