//! Output classification
//!
//! The extension reports transport-level success even when the debugger
//! rejected a command, so raw output has to be read heuristically.

use super::result::FailureKind;

/// Output fragments that always mean the command failed
const SERIOUS_ERROR_MARKERS: &[&str] = &[
    "invalid command",
    "unknown command",
    "syntax error",
    "access violation",
    "exception occurred",
    "debuggee not connected",
    "no current process",
];

/// What the extension prints when the debugger engine refused a command
const GENERIC_FAILURE_MARKER: &str = "error in command execution: command execution failed";

/// Commands that only work while the target is broken in
const STATE_DEPENDENT_PREFIXES: &[&str] =
    &["k", "r", "dv", "p", "t", "gu", "pc", "pt", "~*k", "u", "uf"];

/// Commands that resume, step or change breakpoints; silent on success
const EXECUTION_CONTROL_PREFIXES: &[&str] = &[
    "g", "gh", "gn", "gu", "p", "t", "bp", "ba", "bu", "bm", "bc", "bd", "be", ".restart",
    ".attach", ".detach",
];

/// Extension commands that load symbols and may print nothing when done
const SYMBOL_LOAD_COMMANDS: &[&str] = &["loadusersymbols", "loadallsymbols"];

/// Longest slice of debugger output quoted back in a failure message
const QUOTED_OUTPUT_CHARS: usize = 200;

const TARGET_RUNNING_MESSAGE: &str = "Command unavailable: Target appears to be running (not in break state). Use Ctrl+Break in WinDbg to break execution.";
const MAYBE_RUNNING_MESSAGE: &str = "Command unavailable: Target may be running or not in break state";
const EXECUTED_MESSAGE: &str = "Command executed successfully";

/// How a command relates to the target's run state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTraits {
    pub state_dependent: bool,
    pub execution_control: bool,
    pub symbol_load: bool,
}

impl CommandTraits {
    pub fn of(command: &str) -> Self {
        let lowered = command.trim().to_lowercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lowered.starts_with(p));
        Self {
            state_dependent: starts(STATE_DEPENDENT_PREFIXES),
            execution_control: starts(EXECUTION_CONTROL_PREFIXES),
            symbol_load: SYMBOL_LOAD_COMMANDS.contains(&lowered.as_str()),
        }
    }
}

/// Verdict on one command's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success(String),
    Failure(FailureKind, String),
}

/// Decide whether debugger output means the command worked
pub fn classify_output(command: &str, output: &str) -> Verdict {
    let traits = CommandTraits::of(command);
    let lowered = output.to_lowercase();

    if SERIOUS_ERROR_MARKERS.iter().any(|m| lowered.contains(m)) {
        tracing::warn!(command, "Output contains serious error markers");
        return Verdict::Failure(FailureKind::Semantic, quoted_failure(output));
    }

    if lowered.contains(GENERIC_FAILURE_MARKER) {
        if traits.state_dependent {
            tracing::info!(command, "State-dependent command failed, target likely running");
            return Verdict::Failure(FailureKind::TargetRunning, TARGET_RUNNING_MESSAGE.to_string());
        }
        tracing::warn!(command, "Command failed with generic engine error");
        return Verdict::Failure(FailureKind::Semantic, quoted_failure(output));
    }

    let trimmed = output.trim();
    if trimmed.is_empty() {
        if traits.execution_control {
            return Verdict::Success(EXECUTED_MESSAGE.to_string());
        }
        if traits.symbol_load {
            return Verdict::Success(String::new());
        }
        if traits.state_dependent {
            tracing::info!(command, "State-dependent command returned nothing, target may be running");
            return Verdict::Failure(FailureKind::TargetRunning, MAYBE_RUNNING_MESSAGE.to_string());
        }
        return Verdict::Failure(FailureKind::Semantic, "Command returned empty output".to_string());
    }

    Verdict::Success(trimmed.to_string())
}

fn quoted_failure(output: &str) -> String {
    let quoted: String = output.chars().take(QUOTED_OUTPUT_CHARS).collect();
    format!("Command failed: {}", quoted)
}
