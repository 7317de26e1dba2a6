use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Classifies a failure so that callers can branch without parsing messages.
/// Note that infeasibility is not an error kind: an infeasible program is reported as a regular
/// [AllocationResult](crate::model::result::AllocationResult) tagged with the infeasible status.
#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Copy, Debug)]
pub enum ErrorKind {
    /// The caller handed us malformed data. The message names the offending field.
    InvalidInput,
    /// The optimization engine gave up or returned a status we cannot classify.
    SolverFailed,
    /// A post-solve sanity check failed. Indicates a bug or severe numerical trouble.
    Numeric,
}

/// Error with a kind, a code and a message. The code is an internal identifier that indicates
/// what happened, while the message is a user-facing message that is supposed to help the user.
#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl Error {
    pub fn invalid_input(code: &str, message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::InvalidInput,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn solver_failed(code: &str, message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::SolverFailed,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn numeric(code: &str, message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::Numeric,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

/// Weight of a [Finding]. A rejection makes the checked value unusable for the solvers, a
/// warning does not.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Severity {
    Rejection,
    Warning,
}

/// One defect discovered while checking a value before a solve.
#[derive(PartialEq, Clone, Debug)]
pub struct Finding {
    pub code: &'static str,
    pub message: String,
    pub severity: Severity,
}

/// Defects collected by a pre-solve check, in discovery order. Solver inputs and the dispute
/// aggregate both report their defects this way; the solvers refuse to run on the first
/// rejection while warnings only inform.
#[derive(Default, Clone, Debug)]
pub struct Findings {
    findings: Vec<Finding>,
}

impl Findings {
    pub fn new() -> Findings {
        Findings::default()
    }

    /// Records a defect that makes the checked value unusable.
    pub fn reject(&mut self, code: &'static str, message: impl Into<String>) {
        self.findings.push(Finding {
            code,
            message: message.into(),
            severity: Severity::Rejection,
        });
    }

    /// Records a defect worth telling the caller about that doesn't block a solve.
    pub fn warn(&mut self, code: &'static str, message: impl Into<String>) {
        self.findings.push(Finding {
            code,
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.findings.iter()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.findings.iter().any(|f| f.code == code)
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Turns the first rejection into an invalid-input [Error]. Warnings never fail the check.
    pub fn into_result(self) -> Result<(), Error> {
        match self
            .findings
            .into_iter()
            .find(|f| f.severity == Severity::Rejection)
        {
            Some(f) => Err(Error::invalid_input(f.code, f.message)),
            None => Ok(()),
        }
    }
}
