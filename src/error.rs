use thiserror::Error;

/// Error types for the flow and extraction engines
#[derive(Error, Debug)]
pub enum FlowError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration file: {path}")]
    InvalidConfig { path: String },

    // Schema errors
    #[error("Schema parsing error: {message}")]
    SchemaParsing { message: String },

    #[error("Schema validation error: {message}")]
    SchemaValidation { message: String },

    #[error("No selector configured for rule '{rule}'")]
    NoSelector { rule: String },

    // Page capability errors
    #[error("No element matches selector: {selector}")]
    SelectorNotFound { selector: String },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Unsupported XPath expression: {xpath}")]
    UnsupportedXPath { xpath: String },

    #[error("Page error: {message}")]
    Page { message: String },

    #[error("Navigation failed: {message}")]
    Navigation { message: String },

    #[error("Operation not supported by this page: {operation}")]
    Unsupported { operation: String },

    // Extraction errors
    #[error("Extraction error: {message}")]
    Extraction { message: String },

    #[error("Rule nesting exceeds maximum depth of {depth}")]
    MaxDepthExceeded { depth: usize },

    // Control flow errors
    #[error("Expression error: {message}")]
    Expression { message: String },

    // Export errors
    #[error("Export error: {message}")]
    Export { message: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File system error: {path}")]
    FileSystem { path: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FlowError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a schema validation error
    pub fn schema_validation(message: impl Into<String>) -> Self {
        Self::SchemaValidation { message: message.into() }
    }

    /// Create a page error
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page { message: message.into() }
    }

    /// Create a navigation error
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation { message: message.into() }
    }

    /// Create an extraction error
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction { message: message.into() }
    }

    /// Create an expression error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression { message: message.into() }
    }

    /// Create an export error
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is recoverable within a single run
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Recovered per rule or per page
            Self::SelectorNotFound { .. } |
            Self::InvalidSelector { .. } |
            Self::UnsupportedXPath { .. } |
            Self::Page { .. } |
            Self::Navigation { .. } |
            Self::Unsupported { .. } |
            Self::Extraction { .. } |
            Self::Expression { .. } => true,

            // Caller programming errors
            Self::NoSelector { .. } |
            Self::Configuration { .. } |
            Self::InvalidConfig { .. } |
            Self::SchemaParsing { .. } |
            Self::SchemaValidation { .. } |
            Self::MaxDepthExceeded { .. } => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfig { .. } => "configuration",
            Self::SchemaParsing { .. } | Self::SchemaValidation { .. } | Self::NoSelector { .. } => "schema",
            Self::SelectorNotFound { .. } | Self::InvalidSelector { .. } | Self::UnsupportedXPath { .. } => "selector",
            Self::Page { .. } | Self::Navigation { .. } | Self::Unsupported { .. } => "page",
            Self::Extraction { .. } | Self::MaxDepthExceeded { .. } => "extraction",
            Self::Expression { .. } => "flow",
            Self::Export { .. } | Self::UnsupportedFormat { .. } | Self::FileSystem { .. } => "export",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for the engines
pub type FlowResult<T> = std::result::Result<T, FlowError>;

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::SchemaParsing { message: err.to_string() }
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SchemaParsing { message: err.to_string() }
    }
}

impl From<csv::Error> for FlowError {
    fn from(err: csv::Error) -> Self {
        Self::Export { message: err.to_string() }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem { path: err.to_string() }
    }
}
