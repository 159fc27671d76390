use std::fmt::Display;

use thiserror::Error;

use crate::KeycloudScenarioStep;

#[derive(Error, Debug)]
pub enum KeycloudInputError {
    #[error("invalid scenario file: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid path: {input}")]
    InvalidPath { input: String },
    #[error("expected a closing {expected}")]
    UnclosedValue { expected: char },
    #[error("step does not exist")]
    NonexistentStep,
    #[error("no scenario file exists at {input}\nclosest found: {closest}")]
    InvalidRef { input: String, closest: String },
    #[error("the name \"{name}\" is used by both {path_one} and {path_two}")]
    DuplicateName {
        name: String,
        path_one: String,
        path_two: String,
    },
    #[error("step requires the argument {arg}, which was not supplied. Step has: {has}")]
    NonexistentArgument { arg: String, has: String },
    #[error("argument {arg} was a {was}, expected a {expected}")]
    IncorrectArgumentType {
        arg: String,
        was: String,
        expected: String,
    },
    #[error("argument {arg} requires a non-empty value")]
    ArgumentRequiresValue { arg: String },
    #[error("step cannot run: {reason}")]
    StepRequirementsNotMet { reason: String },
}

#[derive(Error, Debug)]
pub enum KeycloudInternalError {
    #[error("{msg}")]
    Custom { msg: String },
    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum KeycloudTestFailure {
    #[error("expected the browser to be on {expected}, but it is on {actual}")]
    UrlMismatch { expected: String, actual: String },
    #[error("JavaScript error in the browser: {msg}\nbrowser console:\n{logs}")]
    BrowserJavascriptErr { msg: String, logs: String },
    #[error("{msg}")]
    Custom { msg: String },
}

#[derive(Error, Debug)]
pub enum KeycloudStepError {
    #[error("step failed: {0}")]
    External(#[from] KeycloudInputError),
    #[error("harness error: {0}")]
    Internal(#[from] KeycloudInternalError),
    #[error("assertion failed: {0}")]
    Assertion(#[from] KeycloudTestFailure),
}

/// A step error paired with the step it arose from, for reporting.
/// Errors raised before any step ran (e.g. browser acquisition in the
/// scenario setup) carry no step.
#[derive(Debug)]
pub struct KeycloudTestError {
    pub err: KeycloudStepError,
    pub step: Option<KeycloudScenarioStep>,
    pub arg_str: String,
}

impl Display for KeycloudTestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step {
            Some(step) => {
                write!(f, "failed on step: {step}")?;
                if !self.arg_str.trim().is_empty() {
                    write!(f, "\nwith arguments:\n{}", self.arg_str)?;
                }
                write!(f, "\n{}", self.err)
            }
            None => write!(f, "failed during scenario setup\n{}", self.err),
        }
    }
}

impl std::error::Error for KeycloudTestError {}
