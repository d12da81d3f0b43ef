//! Command safety and syntax checks

use regex::Regex;

use crate::common::{Error, Result};

/// Whole-word patterns that mark a command as destructive
const DANGEROUS_WORDS: &[&str] = &[
    "format", "del", "rmdir", "delete", "remove", "kill", "shutdown", "reboot",
];

/// Substrings that mean a dangerous-looking word is debugger syntax
const DEBUGGER_CONTEXT: &[&str] = &["windbg", "debug", "bp", "!analyze", "sxe", "sxi", "~", "|"];

const SAFE_VERBS: &[&str] = &[
    "version", "help", "?", "cls", "clear", "k", "kb", "kp", "kn", "kv", "~", "r", "lm", "x",
    "ln", "dv", "dt", "bp", "bl", "bc", "bd", "be", "ba", "g", "p", "t", "gu", "pc", "pt", "db",
    "dw", "dd", "dq", "da", "du", "eb", "ew", "ed", "eq", "s", "c", "m", "u", "uf", "!analyze",
    "!dump", "!locks", "!handle", "!peb", "!teb", "vertarget", "|", ".restart", ".attach",
    ".detach", ".create", ".cls", ".break", ".time", ".lastevent", "~*k", "~*", "q", "qq", "qd",
    "ctrl+c", "ctrl+break", "sxe", "sxi", "sxd", "loadusersymbols", "loadallsymbols",
];

const CONTROL_COMMANDS: &[&str] = &["q", "qq", "qd", "ctrl+c", "ctrl+break"];

const EXCEPTION_PREFIXES: &[&str] = &["sxe", "sxi", "sxd", "sxr", "sxn"];

const SAFE_PREFIXES: &[&str] = &[
    "!", ".", "k", "~", "r", "lm", "x", "ln", "dv", "dt", "bp", "bl", "bc", "bd", "be", "ba", "g",
    "p", "t", "gu", "pc", "pt", "d", "e", "ver", "|", "s", "u", "uf", "a", "~*", "sx", "q", "c",
    "m",
];

/// Allowlist validator for debugger command text
pub struct CommandValidator {
    enabled: bool,
    dangerous: Regex,
}

impl CommandValidator {
    pub fn new(enabled: bool) -> Result<Self> {
        let pattern = format!(r"\b(?:{})\b", DANGEROUS_WORDS.join("|"));
        let dangerous = Regex::new(&pattern)
            .map_err(|e| Error::Internal(format!("bad safety pattern: {}", e)))?;
        Ok(Self { enabled, dangerous })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Structural check: non-empty, balanced quotes and parentheses.
    /// Applies whether or not the safety allowlist is enabled.
    pub fn syntax_ok(&self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        if command.matches('"').count() % 2 != 0 {
            return false;
        }
        command.matches('(').count() == command.matches(')').count()
    }

    /// Allowlist check against known debugger verbs and prefixes
    pub fn is_safe(&self, command: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let lowered = command.trim().to_lowercase();

        if self.dangerous.is_match(&lowered)
            && !DEBUGGER_CONTEXT.iter().any(|ctx| lowered.contains(ctx))
        {
            return false;
        }

        let verb = lowered.split_whitespace().next().unwrap_or("");
        if SAFE_VERBS.contains(&verb) {
            return true;
        }
        if CONTROL_COMMANDS.contains(&lowered.as_str()) {
            return true;
        }
        if EXCEPTION_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            return true;
        }
        SAFE_PREFIXES.iter().any(|p| lowered.starts_with(p))
    }
}
