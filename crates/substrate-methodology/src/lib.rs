mod context;
pub mod prompt;
pub mod runner;
pub mod types;

pub use prompt::{PromptTemplateSource, StaticTemplateSource};
pub use runner::StepRunner;
pub use types::{
    ArtifactRegistration, ContextRef, ContextSource, PersistKey, PersistRule, PhaseResult, StepDefinition,
    StepOutcome, StepTokenUsage, ABSOLUTE_MAX_PROMPT_TOKENS, CATEGORY_PRIORITY, TOKENS_PER_DECISION,
};
