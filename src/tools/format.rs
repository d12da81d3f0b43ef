//! Text rendering for tool replies and the debugger commands tools build

use super::types::{AnalysisDepth, ContextKind, DxOptions, StepType, SymbolType};
use crate::executor::{CommandResult, ExecutorStatus, FailureKind};

/// Commands whose output reads better with the command echoed above it
const CONTEXT_WORTHY_VERBS: &[&str] = &[
    "da", "db", "dq", "dps", "u", "uf", "k", "kn", "lm", "x", "ln", "dx", "!process", "!thread",
    "!peb", "!teb", "!analyze", "!crash",
];

const EXECUTED: &str = "Command executed successfully";

pub fn needs_context(command: &str) -> bool {
    let lowered = command.trim().to_lowercase();
    let verb = lowered.split_whitespace().next().unwrap_or("");
    CONTEXT_WORTHY_VERBS.contains(&verb)
}

/// Reply for a single command. `suggestion` is only shown for
/// communication failures.
pub fn command_reply(command: &str, result: &CommandResult, suggestion: Option<&str>) -> String {
    if result.success {
        let output = result.output.trim();
        if output.is_empty() {
            return EXECUTED.to_string();
        }
        if needs_context(command) {
            return format!("Command: {}\nOutput:\n{}", command, output);
        }
        return output.to_string();
    }

    let mut reply = format!("Error executing command '{}': {}", command, result.error_text());
    match result.failure {
        Some(FailureKind::Communication) => {
            if let Some(suggestion) = suggestion {
                reply.push_str("\n\nSuggestion: ");
                reply.push_str(suggestion);
            }
        }
        Some(FailureKind::Recovered) => {
            reply.push_str(
                "\n\nThe connection has been automatically restored - you can retry your command now.",
            );
        }
        _ => {}
    }
    reply
}

/// One line per attempted command
pub fn sequence_reply(results: &[CommandResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let n = i + 1;
            if result.success {
                let output = result.output.trim();
                let output = if output.is_empty() { EXECUTED } else { output };
                format!("[{}] {}: {}", n, result.command_executed, output)
            } else if result.indicates_connection_loss() {
                format!(
                    "Command {} failed: {}\n(Connection issue detected - sequence stopped)",
                    n,
                    result.error_text()
                )
            } else {
                format!("Command {} failed: {}", n, result.error_text())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn breakpoint_command(location: &str, condition: Option<&str>, action: Option<&str>) -> String {
    let mut command = format!("bp {}", location.trim());
    if let Some(condition) = condition.filter(|c| !c.trim().is_empty()) {
        command.push(' ');
        command.push_str(condition.trim());
    }
    if let Some(action) = action.filter(|a| !a.trim().is_empty()) {
        command.push_str(&format!(" \"{}\"", action));
    }
    command
}

pub fn step_command(step: StepType) -> &'static str {
    match step {
        StepType::Over => "p",
        StepType::Into => "t",
        StepType::Out => "gu",
    }
}

pub fn step_analysis_commands(depth: AnalysisDepth) -> &'static [&'static str] {
    match depth {
        AnalysisDepth::Basic => &["k", "r"],
        AnalysisDepth::Detailed => &["k", "r", "dv"],
    }
}

/// (command, label) pairs run by `analyze_context`
pub fn context_commands(kind: ContextKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        ContextKind::Full => &[
            ("|", "Process and thread status"),
            ("bl", "Breakpoint list"),
            ("lm", "Loaded modules"),
            ("~", "Thread list"),
        ],
        ContextKind::Stack => &[
            ("k", "Stack trace"),
            ("kb", "Stack trace with arguments"),
            ("kp", "Stack trace with parameters"),
        ],
        ContextKind::Memory => &[
            ("r", "Registers"),
            ("dps @esp", "Stack memory"),
            ("dps @ebp", "Frame memory"),
        ],
        ContextKind::Process => &[
            ("|", "Current process and thread"),
            ("~", "All threads"),
            ("!process", "Process information"),
        ],
    }
}

pub fn dx_command(expression: &str, options: &DxOptions) -> String {
    let mut command = String::from("dx");
    if options.grid {
        command.push_str(" -g");
    }
    if let Some(size) = options.grid_cell_size {
        command.push_str(&format!(" -gc {}", size));
    }
    if let Some(skip) = options.container_skip {
        command.push_str(&format!(" -c {}", skip));
    }
    if options.native_only {
        command.push_str(" -n");
    }
    if options.verbose {
        command.push_str(" -v");
    }
    if let Some(level) = options.recursion_level.filter(|l| *l > 1) {
        command.push_str(&format!(" -r{}", level));
    }
    match options.format_specifier.as_deref().filter(|f| !f.is_empty()) {
        Some(format) => command.push_str(&format!(" {},{}", expression, format)),
        None => command.push_str(&format!(" {}", expression)),
    }
    command
}

/// Reply for a symbol load. The loaders are often silent on success.
pub fn symbols_reply(symbols: SymbolType, result: &CommandResult) -> String {
    let output = result.output.trim();
    if result.success {
        if !output.is_empty() {
            return output.to_string();
        }
        let description = symbols.description();
        let mut chars = description.chars();
        let capitalized: String = chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
            .unwrap_or_default();
        return format!("{} loaded successfully", capitalized);
    }

    let mut reply = format!("Error loading {}: {}", symbols.description(), result.error_text());
    if !output.is_empty() {
        reply.push_str("\nOutput: ");
        reply.push_str(output);
    }
    reply
}

pub fn status_report(status: &ExecutorStatus, endpoint: &str, suggestion: Option<&str>) -> String {
    let health = &status.health;
    let mut lines = vec![
        format!("Endpoint: {}", endpoint),
        format!("Connected: {}", health.is_connected),
        format!("Extension responsive: {}", health.extension_responsive),
        format!("Consecutive failures: {}", health.consecutive_failures),
        format!(
            "Consecutive communication errors: {}",
            status.consecutive_communication_errors
        ),
        format!(
            "Pool: {} open ({} in use, {} idle) of {}, {} created",
            status.pool.open, status.pool.in_use, status.pool.idle, status.pool.capacity, status.pool.total_created
        ),
        format!("Cached results: {}", status.cache_entries),
        format!("Session: {}", status.context.session_id),
    ];
    if let Some(command) = &status.context.last_command {
        lines.push(format!("Last command: {}", command));
    }
    if let Some(error) = &health.last_error {
        lines.push(format!("Last error: {}", error));
    }
    if let Some(suggestion) = suggestion {
        lines.push(format!("Suggestion: {}", suggestion));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_reply_success() {
        let plain = CommandResult::success("eax=1", "r");
        assert_eq!(command_reply("r", &plain, None), "eax=1");

        let stack = CommandResult::success("00 ntdll!foo", "k");
        assert_eq!(
            command_reply("k", &stack, None),
            "Command: k\nOutput:\n00 ntdll!foo"
        );
    }

    #[test]
    fn test_command_reply_failure_with_suggestion() {
        let failed = CommandResult::failure(FailureKind::Communication, "Communication error: boom", "lm");
        let reply = command_reply("lm", &failed, Some("Check WinDbg"));
        assert_eq!(
            reply,
            "Error executing command 'lm': Communication error: boom\n\nSuggestion: Check WinDbg"
        );

        // Suggestions only ride along with communication errors
        let semantic = CommandResult::failure(FailureKind::Semantic, "Command failed: x", "lm");
        assert!(!command_reply("lm", &semantic, Some("ignored")).contains("Suggestion"));
    }

    #[test]
    fn test_sequence_reply() {
        let results = vec![
            CommandResult::success("frames", "k"),
            CommandResult::success("", "g"),
            CommandResult::failure(FailureKind::ConnectionLost, "Connection lost to WinDbg extension.", "r"),
        ];
        let text = sequence_reply(&results);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[1] k: frames");
        assert_eq!(lines[1], "[2] g: Command executed successfully");
        assert_eq!(lines[2], "Command 3 failed: Connection lost to WinDbg extension.");
        assert_eq!(lines[3], "(Connection issue detected - sequence stopped)");
    }

    #[test]
    fn test_breakpoint_command() {
        assert_eq!(breakpoint_command("main", None, None), "bp main");
        assert_eq!(
            breakpoint_command("kernel32!CreateFileW", Some("/1"), Some("k; g")),
            "bp kernel32!CreateFileW /1 \"k; g\""
        );
        assert_eq!(breakpoint_command("main", Some(" "), None), "bp main");
    }

    #[test]
    fn test_dx_command() {
        let options = DxOptions {
            grid: true,
            grid_cell_size: Some(20),
            container_skip: Some(5),
            native_only: true,
            verbose: true,
            recursion_level: Some(3),
            format_specifier: Some("x".to_string()),
        };
        assert_eq!(
            dx_command("@$curprocess", &options),
            "dx -g -gc 20 -c 5 -n -v -r3 @$curprocess,x"
        );

        let defaults = DxOptions {
            recursion_level: Some(1),
            ..DxOptions::default()
        };
        assert_eq!(dx_command("@$curthread", &defaults), "dx @$curthread");
    }

    #[test]
    fn test_step_tables() {
        assert_eq!(step_command(StepType::Out), "gu");
        assert_eq!(step_analysis_commands(AnalysisDepth::Detailed), &["k", "r", "dv"]);
        assert_eq!(context_commands(ContextKind::Stack).len(), 3);
    }

    #[test]
    fn test_needs_context() {
        assert!(needs_context("!analyze -v"));
        assert!(needs_context("dx @$curprocess"));
        assert!(!needs_context("r"));
        assert!(!needs_context("kb"));
    }

    #[test]
    fn test_symbols_reply() {
        let quiet = CommandResult::success("", "loadusersymbols");
        assert_eq!(symbols_reply(SymbolType::User, &quiet), "User-mode symbols loaded successfully");

        let quiet = CommandResult::success("", "loadallsymbols");
        assert_eq!(symbols_reply(SymbolType::All, &quiet), "All symbols loaded successfully");

        let chatty = CommandResult::success("Loaded 3 modules", "loadallsymbols");
        assert_eq!(symbols_reply(SymbolType::All, &chatty), "Loaded 3 modules");

        let failed = CommandResult::failure(FailureKind::Timeout, "Command execution timed out after 10ms", "loadallsymbols");
        assert_eq!(
            symbols_reply(SymbolType::All, &failed),
            "Error loading all symbols: Command execution timed out after 10ms"
        );
    }
}
