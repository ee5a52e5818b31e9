//! An interface to a debugger.
//!
//! Contains the line-oriented commands and their parser. A command is a
//! request to the debugger core that defines an action and a list of input
//! arguments.

pub mod parser;

use crate::debugger::{Error, FileLocation};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Parsing(String),
    #[error(transparent)]
    Handle(#[from] Error),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// External commands that can be processed by the debugger.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `r <url>`
    JumpToPage(String),
    /// `b <file>:<line>`
    Breakpoint(FileLocation),
    /// `d <id>`
    RemoveBreakpoint(u32),
    /// `n`
    StepOver,
    /// `s`
    StepInto,
    /// `u`
    StepOut,
    /// `c`
    Continue,
    /// `l`
    ShowLine,
    /// `il [group]`
    ListLocals(Option<i32>),
    /// `ig [group]`
    ListGlobals(Option<i32>),
    /// `p <expr>`
    Print(String),
    /// empty input
    SkipInput,
    /// `q`
    Quit,
}
