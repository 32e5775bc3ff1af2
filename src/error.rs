use std::time::Duration;

use thiserror::Error;

/// Failure reported by a platform collaborator. Always carried as data by the
/// orchestration layers, never propagated as a crash.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarnessError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("graph store error: {0}")]
    Graph(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("finding rejected: {0}")]
    Finding(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Errors that escape the module runner's top-level calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("suite cancelled before any module ran")]
    Cancelled,
}

/// Structural errors of the recon runner. Tool and parse failures are not
/// represented here; they land in a phase's error list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconError {
    #[error("unknown recon phase: {0}")]
    UnknownPhase(String),

    #[error("reconnaissance cancelled")]
    Cancelled,
}

/// Tool output that could not be decoded into a phase shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{tool} output is not a JSON object")]
    NotAnObject { tool: String },

    #[error("{tool} output could not be decoded: {message}")]
    Malformed { tool: String, message: String },
}

/// Violation of the graph vocabulary or a node type's required properties.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("unknown relationship type: {0}")]
    UnknownRelationType(String),

    #[error("{node_type} node {id} is missing required property `{property}`")]
    MissingProperty {
        node_type: &'static str,
        id: String,
        property: &'static str,
    },

    #[error("{node_type} node {id} carries forbidden property `{property}`")]
    ForbiddenProperty {
        node_type: &'static str,
        id: String,
        property: &'static str,
    },

    #[error("{0} node has an empty id")]
    EmptyId(&'static str),

    #[error("{0} relationship has an empty endpoint")]
    DanglingRelationship(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid execution mode: {0} (must be full, sdk, framework, network-recon, or single)")]
    InvalidMode(String),

    #[error("single mode requires at least one target test")]
    MissingTargetTests,

    #[error("{0} must be positive")]
    NonPositiveTimeout(&'static str),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid task metadata: {0}")]
    Metadata(String),
}

/// A model reply that does not carry the JSON document it was asked for.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("no JSON found in response")]
    NoJson,

    #[error("failed to parse JSON: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
