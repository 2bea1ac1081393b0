use crate::tree::NodeId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading, merging or fetching the taxonomy tree.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A table line could not be parsed.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A node collaborator failed to answer.
    #[error("node source failed: {0}")]
    Source(String),

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// No root record was found for a hierarchy.
    #[error("no {level} root record for {hierarchy}")]
    MissingRoot { hierarchy: String, level: String },

    /// A cohort lacks a child that the comparison hierarchy has (or the reverse).
    #[error("cohort {cohort} has {found} children under '{parent}', comparison has {expected}")]
    MissingSibling {
        parent: String,
        cohort: String,
        expected: usize,
        found: usize,
    },

    /// Sorted sibling lists disagree on the name at one position.
    #[error("cohort {cohort} child #{position} under '{parent}' is '{found}', expected '{expected}'")]
    MisalignedSiblings {
        parent: String,
        cohort: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("malformed histogram: {0}")]
    MalformedHistogram(String),

    #[error("at least one cohort is required")]
    NoCohorts,

    /// The tree was replaced while a fetch was outstanding.
    #[error("tree generation {requested} was replaced by generation {current}")]
    Superseded { requested: u64, current: u64 },

    #[error("no tree has been loaded")]
    NoTree,
}
