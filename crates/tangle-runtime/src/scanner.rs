use std::{borrow::Cow, fmt::Display};

use crate::lexer::Lexer;

/// Hand written lexer for tokens whose shape depends on previously scanned text.
///
/// The engine restores the state with [`ExternalScanner::deserialize`] before every
/// call to [`ExternalScanner::scan`] and saves it with [`ExternalScanner::serialize`]
/// after every successful one, so implementations may leave garbage behind when a
/// scan fails.
pub trait ExternalScanner: Send {
    /// `valid[i]` tells whether the i-th external token of the grammar is accepted at
    /// the current position. Returns the index of the recognized token.
    fn scan(&mut self, lexer: &mut Lexer, valid: &[bool]) -> Option<usize>;
    fn serialize(&self, buffer: &mut Vec<u8>);
    /// An empty buffer always restores the initial state.
    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ScannerStateError>;
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScannerStateError {
    message: Cow<'static, str>,
}

impl ScannerStateError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> ScannerStateError {
        ScannerStateError {
            message: message.into(),
        }
    }
}

impl Display for ScannerStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid scanner state: {}", self.message)
    }
}

impl std::error::Error for ScannerStateError {}
