//! Error types for the layer model.

/// Errors raised while building, merging, parsing or rendering layers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An argument was given an empty name.
    #[error("Argument name must not be empty")]
    EmptyName,

    /// An argument carries an `id` attribute without a usable value.
    #[error("Argument '{name}': id must be a non-empty string")]
    InvalidIdentity { name: String },

    /// An update or removal would change an id that is already assigned.
    #[error("Argument '{name}': id '{current}' cannot be {requested}")]
    IdentityConflict {
        name: String,
        current: String,
        requested: String,
    },

    /// No layer in the stack configured an engine.
    #[error("No engine configured: set `engine` in the [general] section of a layer")]
    MissingEngine,

    /// More than one addition argument claims the identity of a single base argument.
    #[error("{count} arguments match identity '{name}' (id: {id}); a layer may hold each identity once")]
    MultipleIdentityMatch {
        name: String,
        id: String,
        count: usize,
    },

    /// Malformed layer text.
    #[error("Layer syntax error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Duplicate section [{section}] at line {line}")]
    DuplicateSection { section: String, line: usize },

    #[error("Duplicate key '{key}' in section [{section}] at line {line}")]
    DuplicateOption {
        section: String,
        key: String,
        line: usize,
    },

    #[error("Invalid boolean for '{key}': '{value}' (expected yes/no, true/false, on/off or 1/0)")]
    InvalidBoolean { key: String, value: String },

    #[error("Invalid mode '{0}' (expected 'system' or 'user')")]
    InvalidMode(String),

    /// The layer cannot be written back to text that reads as the same layer.
    #[error("Layer cannot be serialized: section [{section}] {reason}")]
    UnrepresentableLayer { section: String, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
