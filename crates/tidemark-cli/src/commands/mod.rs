pub mod migrate;

use std::process::ExitCode;

/// How a command finished, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    NothingToDo,
    /// A run stopped at a failing unit
    Halted,
}

impl CommandOutcome {
    pub fn code(self) -> u8 {
        match self {
            CommandOutcome::Success | CommandOutcome::NothingToDo => 0,
            CommandOutcome::Halted => EXIT_HALTED,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// A unit failed mid-run
pub const EXIT_HALTED: u8 = 1;

/// The command was rejected before anything was changed
pub const EXIT_PREFLIGHT: u8 = 2;
