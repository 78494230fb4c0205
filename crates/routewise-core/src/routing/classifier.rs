//! Task classification
//!
//! Maps a task to the tier that should serve it. A static type table wins;
//! otherwise the task's flags are checked in a fixed priority order.

use std::collections::HashMap;

use super::types::{ModelTier, Task, TaskType};

/// Context length above which a task needs a generation-class model
pub const LONG_CONTEXT_THRESHOLD: u32 = 50_000;

/// Context length below which JSON tasks stay on classification models
pub const SHORT_JSON_THRESHOLD: u32 = 5_000;

/// Pure task → tier classifier
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    table: HashMap<TaskType, ModelTier>,
}

impl TaskClassifier {
    /// Classifier with the default type → tier table
    pub fn new() -> Self {
        let table = HashMap::from([
            (TaskType::StrategicAnalysis, ModelTier::Reasoning),
            (TaskType::DecisionSupport, ModelTier::Reasoning),
            (TaskType::ContentGeneration, ModelTier::Generation),
            (TaskType::ReportWriting, ModelTier::Generation),
            (TaskType::Summarization, ModelTier::Conversation),
            (TaskType::Conversation, ModelTier::Conversation),
            (TaskType::Faq, ModelTier::Conversation),
            (TaskType::Classification, ModelTier::Classification),
            (TaskType::IntentDetection, ModelTier::Classification),
            (TaskType::EntityExtraction, ModelTier::Classification),
            (TaskType::Sentiment, ModelTier::Classification),
            (TaskType::Routing, ModelTier::Classification),
            (TaskType::PrivateData, ModelTier::Local),
            (TaskType::GovernanceCheck, ModelTier::Local),
        ]);
        Self { table }
    }

    /// Classifier with no table; every task goes through the heuristics
    pub fn heuristics_only() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Pin a task type to a tier
    pub fn with_override(mut self, task_type: TaskType, tier: ModelTier) -> Self {
        self.table.insert(task_type, tier);
        self
    }

    /// Tier configured for a task type, if any
    pub fn table_tier(&self, task_type: TaskType) -> Option<ModelTier> {
        self.table.get(&task_type).copied()
    }

    /// Classify a task. Deterministic for identical field values.
    pub fn classify(&self, task: &Task) -> ModelTier {
        if let Some(tier) = self.table_tier(task.task_type) {
            return tier;
        }

        if task.requires_reasoning || task.high_stakes {
            ModelTier::Reasoning
        } else if task.requires_generation || task.context_length > LONG_CONTEXT_THRESHOLD {
            ModelTier::Generation
        } else if task.requires_low_latency {
            ModelTier::Classification
        } else if task.requires_json && task.context_length < SHORT_JSON_THRESHOLD {
            ModelTier::Classification
        } else {
            ModelTier::Conversation
        }
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general() -> Task {
        Task::new(TaskType::General)
    }

    #[test]
    fn test_table_lookup_wins_over_flags() {
        let classifier = TaskClassifier::new();
        let task = Task::new(TaskType::Faq).with_reasoning(true);
        assert_eq!(classifier.classify(&task), ModelTier::Conversation);

        let task = Task::new(TaskType::PrivateData).with_high_stakes(true);
        assert_eq!(classifier.classify(&task), ModelTier::Local);
    }

    #[test]
    fn test_heuristic_priority() {
        let c = TaskClassifier::new();

        // (a) reasoning beats everything below it
        let task = general()
            .with_reasoning(true)
            .with_generation(true)
            .with_low_latency(true);
        assert_eq!(c.classify(&task), ModelTier::Reasoning);
        assert_eq!(c.classify(&general().with_high_stakes(true)), ModelTier::Reasoning);

        // (b) generation or long context
        let task = general().with_generation(true).with_low_latency(true);
        assert_eq!(c.classify(&task), ModelTier::Generation);
        let task = general().with_context_length(50_001).with_low_latency(true);
        assert_eq!(c.classify(&task), ModelTier::Generation);
        let task = general().with_context_length(50_000);
        assert_eq!(c.classify(&task), ModelTier::Conversation);

        // (c) low latency
        let task = general().with_low_latency(true).with_json(true);
        assert_eq!(c.classify(&task), ModelTier::Classification);

        // (d) short json only
        let task = general().with_json(true).with_context_length(4_999);
        assert_eq!(c.classify(&task), ModelTier::Classification);
        let task = general().with_json(true).with_context_length(5_000);
        assert_eq!(c.classify(&task), ModelTier::Conversation);

        // (e) default
        assert_eq!(c.classify(&general()), ModelTier::Conversation);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let c = TaskClassifier::new();
        let task = general().with_json(true).with_context_length(1200);
        let first = c.classify(&task);
        for _ in 0..100 {
            assert_eq!(c.classify(&task.clone()), first);
        }
    }

    #[test]
    fn test_override_and_heuristics_only() {
        let c = TaskClassifier::heuristics_only();
        assert_eq!(
            c.classify(&Task::new(TaskType::StrategicAnalysis)),
            ModelTier::Conversation
        );

        let c = c.with_override(TaskType::General, ModelTier::Local);
        assert_eq!(c.classify(&general().with_reasoning(true)), ModelTier::Local);
    }
}
