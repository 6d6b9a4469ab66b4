//! Intent classifier layer.
//!
//! Pattern classification runs first and costs nothing. When it is not
//! confident and a model is configured, the model is asked for a JSON
//! classification. Results are memoized per (message, context).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use isms_llm::{GenerateRequest, LanguageModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::decision::{DecisionPayload, Handler, Route, RoutingDecision};
use super::lexicon;
use super::{RouteInput, RouteStrategy};
use crate::error::Result;
use crate::resolution::names::extract_name;
use crate::session::SessionContext;
use crate::structured_output::parse_structured;
use crate::types::{ConversationContext, ObjectType, Operation, OperationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Create,
    List,
    Get,
    Update,
    Delete,
    Analyze,
    Capabilities,
    Knowledge,
    Chat,
}

impl IntentLabel {
    fn operation(&self) -> Option<OperationKind> {
        match self {
            IntentLabel::Create => Some(OperationKind::Create),
            IntentLabel::List => Some(OperationKind::List),
            IntentLabel::Get => Some(OperationKind::Get),
            IntentLabel::Update => Some(OperationKind::Update),
            IntentLabel::Delete => Some(OperationKind::Delete),
            IntentLabel::Analyze => Some(OperationKind::Analyze),
            IntentLabel::Capabilities | IntentLabel::Knowledge | IntentLabel::Chat => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Pattern,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentLabel,
    pub confidence: f32,
    #[serde(default)]
    pub object_type: Option<ObjectType>,
    pub source: ClassificationSource,
}

/// Shape the model is asked to return.
#[derive(Debug, Deserialize)]
struct ModelClassification {
    intent: IntentLabel,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    object_type: Option<ObjectType>,
}

const CAPABILITY_PHRASES: &[&str] = &[
    "what can you do",
    "what are your capabilities",
    "your capabilities",
    "help me get started",
    "what do you support",
    "how can you help",
];

/// "what can you do?" and friends.
pub fn asks_capabilities(lower: &str) -> bool {
    let lower = lower.trim().trim_end_matches(['?', '!', '.']);
    lower == "help" || CAPABILITY_PHRASES.iter().any(|p| lower.contains(p))
}

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You classify messages sent to an ISMS compliance assistant.

Intents:
- create: the user wants a new object. Examples: "add a new firewall asset", "set up scope Finance".
  Not create: "how do I create a scope" (knowledge), "what happens when I create an asset" (knowledge).
- list: the user wants to see existing objects. Examples: "which persons are registered", "give me all controls".
  Not list: "what is a control" (knowledge).
- get: details of one object. Example: "details for asset Desktop".
- update: change a field of one object. Example: "the Alpha scope should be called Beta".
- delete: remove objects. Example: "get rid of asset Printer".
  Not delete: "how do I delete an asset" (knowledge).
- analyze: assess one object. Example: "how well protected is asset Desktop".
- capabilities: the user asks what the assistant can do.
- knowledge: questions about ISO 27001, GDPR or how the platform works.
- chat: anything else.

Object types: scope, asset, control, person, process, document, incident, scenario.

Respond with JSON only: {"intent": "<intent>", "confidence": <0.0-1.0>, "object_type": "<type or null>"}"#;

/// Classifies an utterance into an [`IntentLabel`].
pub struct IntentClassifier {
    model: Option<Arc<dyn LanguageModel>>,
    threshold: f32,
    capacity: usize,
    cache: Mutex<ClassificationCache>,
}

#[derive(Default)]
struct ClassificationCache {
    entries: HashMap<String, Option<Classification>>,
    order: VecDeque<String>,
}

impl IntentClassifier {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, threshold: f32, capacity: usize) -> Self {
        Self {
            model,
            threshold,
            capacity: capacity.max(1),
            cache: Mutex::new(ClassificationCache::default()),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ClassificationCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached_entries(&self) -> usize {
        self.lock().entries.len()
    }

    /// Keyword-only classification.
    pub fn classify_pattern(&self, message: &str) -> Option<Classification> {
        let lower = message.trim().to_lowercase();
        let object_type = lexicon::find_object_type(&lower).map(|(t, _)| t);

        if asks_capabilities(&lower) {
            return Some(Classification {
                intent: IntentLabel::Capabilities,
                confidence: 0.9,
                object_type: None,
                source: ClassificationSource::Pattern,
            });
        }

        if lexicon::is_question(&lower) {
            return None;
        }

        let (kind, _) = lexicon::find_operation(&lower)?;
        let intent = match kind {
            OperationKind::Create => IntentLabel::Create,
            OperationKind::List => IntentLabel::List,
            _ => return None,
        };
        Some(Classification {
            intent,
            confidence: 0.7,
            object_type,
            source: ClassificationSource::Pattern,
        })
    }

    async fn classify_model(&self, message: &str) -> Option<Classification> {
        let model = self.model.as_ref()?;
        let request = GenerateRequest::new(CLASSIFIER_SYSTEM_PROMPT, format!("Message: {}", message))
            .max_tokens(120)
            .json();
        let text = match model.generate(&request).await {
            Ok(text) => text,
            Err(e) if e.is_quota() => {
                info!("Classifier model over quota, using pattern classification only");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Classifier model call failed");
                return None;
            }
        };
        match parse_structured::<ModelClassification>(&text, &["intent"]) {
            Ok(parsed) => Some(Classification {
                intent: parsed.intent,
                confidence: parsed.confidence.unwrap_or(0.6).clamp(0.0, 1.0),
                object_type: parsed.object_type,
                source: ClassificationSource::Model,
            }),
            Err(e) => {
                debug!(error = %e, "Classifier output unusable");
                None
            }
        }
    }

    /// Classify, memoized by lowercased message and context fingerprint.
    ///
    /// Returns `None` when nothing reaches the classifier threshold.
    pub async fn classify(
        &self,
        message: &str,
        context: &ConversationContext,
    ) -> Option<Classification> {
        let key = format!("{}#{}", message.trim().to_lowercase(), context.fingerprint());
        if let Some(hit) = self.lock().entries.get(&key) {
            return hit.clone();
        }

        let pattern = self
            .classify_pattern(message)
            .filter(|c| c.confidence >= self.threshold);
        let result = match pattern {
            Some(c) => Some(c),
            None => self
                .classify_model(message)
                .await
                .filter(|c| c.confidence >= self.threshold),
        };

        let mut cache = self.lock();
        if !cache.entries.contains_key(&key) {
            while cache.order.len() >= self.capacity {
                if let Some(oldest) = cache.order.pop_front() {
                    cache.entries.remove(&oldest);
                }
            }
            cache.order.push_back(key.clone());
        }
        cache.entries.insert(key, result.clone());
        result
    }
}

/// Chain layer acting on classifier output at or above the override threshold.
pub struct ClassifierStrategy {
    classifier: Arc<IntentClassifier>,
    override_threshold: f32,
}

impl ClassifierStrategy {
    pub fn new(classifier: Arc<IntentClassifier>, override_threshold: f32) -> Self {
        Self {
            classifier,
            override_threshold,
        }
    }
}

#[async_trait]
impl RouteStrategy for ClassifierStrategy {
    fn name(&self) -> &'static str {
        "intent_classifier"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let Some(c) = self.classifier.classify(&input.text, &input.context).await else {
            return Ok(None);
        };
        if c.confidence < self.override_threshold {
            return Ok(None);
        }

        match c.intent {
            IntentLabel::Capabilities | IntentLabel::Knowledge => Ok(Some(RoutingDecision::new(
                Route::IntentClassifier,
                Handler::Knowledge,
                c.confidence,
                DecisionPayload::Knowledge {
                    question: input.text.clone(),
                },
            ))),
            IntentLabel::Chat => Ok(None),
            label => {
                let Some(kind) = label.operation() else {
                    return Ok(None);
                };
                // Without an object type there is nothing to dispatch.
                let Some(object_type) = c
                    .object_type
                    .or_else(|| lexicon::find_object_type(&input.lower).map(|(t, _)| t))
                else {
                    return Ok(None);
                };
                if kind.is_mutating()
                    && lexicon::is_question(&input.lower)
                    && !lexicon::question_allowed(&input.lower)
                {
                    return Ok(None);
                }
                let mut op = Operation::on(kind, object_type);
                if kind != OperationKind::List {
                    op.params.name = extract_name(&input.text, Some(object_type));
                }
                Ok(Some(RoutingDecision::operation(
                    Route::IntentClassifier,
                    c.confidence,
                    op,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(None, 0.7, 2)
    }

    #[test]
    fn test_pattern_capabilities() {
        let c = classifier().classify_pattern("What can you do?").unwrap();
        assert_eq!(c.intent, IntentLabel::Capabilities);
        assert_eq!(c.confidence, 0.9);
    }

    #[test]
    fn test_pattern_create_and_list() {
        let c = classifier().classify_pattern("create the Finance scope").unwrap();
        assert_eq!(c.intent, IntentLabel::Create);
        assert_eq!(c.confidence, 0.7);
        assert_eq!(c.object_type, Some(ObjectType::Scope));
        assert!(classifier().classify_pattern("how do I create a scope").is_none());
        assert!(classifier().classify_pattern("delete asset X").is_none());
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let c = classifier();
        let ctx = ConversationContext::default();
        c.classify("list scopes", &ctx).await;
        c.classify("list assets", &ctx).await;
        c.classify("list persons", &ctx).await;
        assert_eq!(c.cached_entries(), 2);
        // repeat lookups hit the cache
        assert_eq!(
            c.classify("LIST PERSONS", &ctx).await.map(|c| c.intent),
            Some(IntentLabel::List)
        );
        assert_eq!(c.cached_entries(), 2);
    }

    #[tokio::test]
    async fn test_strategy_builds_operation() {
        let strategy = ClassifierStrategy::new(Arc::new(classifier()), 0.6);
        let input = RouteInput::new(&"create the Finance scope".into());
        let d = strategy
            .evaluate(&input, &SessionContext::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.route, Route::IntentClassifier);
        assert_eq!(d.operations()[0].kind, OperationKind::Create);
    }
}
