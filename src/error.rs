use crate::verify::result::Violation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Query rejected with {} violation(s): {}", .violations.len(), format_codes(.violations))]
    Validation { violations: Vec<Violation> },

    #[error("Query timed out after {timeout_ms}ms on backend '{backend}'")]
    Timeout { backend: &'static str, timeout_ms: u64 },

    #[error("Query returned {returned} rows, exceeding the {max} row cap")]
    RowLimit { returned: usize, max: usize },

    #[error("Backend '{}' error{}: {}", .backend, format_code(.code), .message)]
    Backend {
        backend: &'static str,
        code: Option<String>,
        message: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Ontology error: {0}")]
    Ontology(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SentinelError {
    /// Violations attached to a validation failure, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            SentinelError::Validation { violations } => violations,
            _ => &[],
        }
    }
}

fn format_codes(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_code(code: &Option<String>) -> String {
    match code {
        Some(c) => format!(" (code {})", c),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
