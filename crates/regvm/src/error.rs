//! The core's single in-band error signal (spec §7).
//!
//! The bytecode core has no language-visible exception objects yet — that
//! is a future layer built on top of this sticky slot. What the core does
//! provide are the five error kinds spec §7 enumerates, each carrying
//! enough context for an embedder to build a real exception value or a
//! diagnostic from it.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

/// Where in the source an error occurred, attached at the throw site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub url: Option<String>,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{url}:{}", self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// One of the five error kinds the core can signal (spec §7).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("ReferenceError: {0}")]
    Reference(String),
    #[error("TypeError: {0}")]
    Type(String),
    #[error("RangeError: {0}")]
    Range(String),
    #[error("SyntaxError: {0}")]
    Syntax(String),
    #[error("out of memory")]
    OutOfMemory,
}

/// The sticky exception value. Carries an optional [`SourceLocation`],
/// filled in by the dispatch loop at the point an opcode detects the
/// error, per spec §7's propagation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub kind: ErrorKind,
    pub location: Option<SourceLocation>,
}

impl VmError {
    pub fn new(kind: ErrorKind) -> Self {
        VmError { kind, location: None }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn reference(name: impl Into<String>) -> Self {
        VmError::new(ErrorKind::Reference(format!("{} is not defined", name.into())))
    }

    pub fn ty(message: impl Into<String>) -> Self {
        VmError::new(ErrorKind::Type(message.into()))
    }

    pub fn range(message: impl Into<String>) -> Self {
        VmError::new(ErrorKind::Range(message.into()))
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        VmError::new(ErrorKind::Syntax(message.into()))
    }

    pub fn out_of_memory() -> Self {
        VmError::new(ErrorKind::OutOfMemory)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} ({loc})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}
