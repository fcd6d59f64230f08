use thiserror::Error;

/// The validation categories a `ValidationError` can carry, matching the
/// fixed vocabulary the task-graph engine and config system report against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCategory {
    Schema,
    Cycle,
    DanglingRef,
    EmptyGraph,
    NoBudget,
}

impl ValidationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCategory::Schema => "schema",
            ValidationCategory::Cycle => "cycle",
            ValidationCategory::DanglingRef => "dangling_ref",
            ValidationCategory::EmptyGraph => "empty_graph",
            ValidationCategory::NoBudget => "no_budget",
        }
    }
}

/// Typed error taxonomy shared across every Substrate crate. Library code
/// returns this directly; only the binary crate widens it to `anyhow::Error`.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("validation error in {field}: {message}")]
    Validation {
        category: ValidationCategory,
        field: String,
        message: String,
        suggestion: Option<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("amendment chain exceeded max depth {max_depth}")]
    ChainTooDeep { max_depth: u32 },

    #[error("config error: {0}")]
    Config(String),

    #[error("incompatible config format version {found}, current is {current}: {message}")]
    IncompatibleFormat {
        found: String,
        current: String,
        message: String,
    },

    #[error("dispatch {status}: {message}")]
    Dispatch { status: String, message: String },

    #[error("budget exceeded: {current} > {limit}")]
    BudgetExceeded { limit: f64, current: f64 },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl SubstrateError {
    pub fn validation(
        category: ValidationCategory,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SubstrateError::Validation {
            category,
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if let SubstrateError::Validation {
            suggestion: slot, ..
        } = &mut self
        {
            *slot = Some(suggestion.into());
        }
        self
    }

    /// Maps an error to the stable CLI exit code described in the external
    /// interfaces: 0 success, 1 runtime error, 2 validation/usage error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SubstrateError::Validation { .. } => 2,
            _ => 1,
        }
    }
}

pub type SubstrateResult<T> = Result<T, SubstrateError>;
