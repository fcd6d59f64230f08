use serde_json::Value;

/// Where a `{{placeholder}}` in a prompt template gets its value from.
#[derive(Debug, Clone)]
pub enum ContextSource {
    Param(String),
    Decision { phase: String, category: String },
    Step(String),
}

#[derive(Debug, Clone)]
pub struct ContextRef {
    pub placeholder: String,
    pub source: ContextSource,
}

#[derive(Debug, Clone)]
pub enum PersistKey {
    Fixed(String),
    Array,
}

#[derive(Debug, Clone)]
pub struct PersistRule {
    pub field: String,
    pub category: String,
    pub key: PersistKey,
}

#[derive(Debug, Clone)]
pub struct ArtifactRegistration {
    pub kind: String,
    pub path: String,
    pub summarize: fn(&Value) -> String,
}

#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub name: String,
    pub task_type: String,
    pub context: Vec<ContextRef>,
    pub persist: Vec<PersistRule>,
    pub register_artifact: Option<ArtifactRegistration>,
}

#[derive(Debug, Clone, Default)]
pub struct StepTokenUsage {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub token_usage: StepTokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    pub token_usage: StepTokenUsage,
    pub error: Option<String>,
}

pub const TOKENS_PER_DECISION: u64 = 100;
pub const ABSOLUTE_MAX_PROMPT_TOKENS: u64 = 32_000;

pub const CATEGORY_PRIORITY: &[&str] = &[
    "data",
    "auth",
    "api",
    "runtime",
    "storage",
    "observability",
    "ci",
    "other",
];
