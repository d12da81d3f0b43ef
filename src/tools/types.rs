use schemars::JsonSchema;
use serde::Deserialize;

// ============================================================================
// execute_command
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteCommandArgs {
    /// WinDbg command text, e.g. "k", "lm", "!analyze -v"
    pub command: String,
    /// Timeout in milliseconds (default depends on the command)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// execute_sequence
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteSequenceArgs {
    /// Commands to run in order
    pub commands: Vec<String>,
    /// Stop at the first failed command (default: false)
    #[serde(default)]
    pub stop_on_error: Option<bool>,
    /// Timeout applied to each command in milliseconds
    #[serde(default)]
    pub timeout_per_command_ms: Option<u64>,
}

// ============================================================================
// set_breakpoint
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetBreakpointArgs {
    /// Symbol or address, e.g. "kernel32!CreateFileW"
    pub location: String,
    /// Condition appended after the location, e.g. "/p @$proc"
    #[serde(default)]
    pub condition: Option<String>,
    /// Command string run when the breakpoint hits
    #[serde(default)]
    pub command: Option<String>,
}

// ============================================================================
// step_and_analyze
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[default]
    Over,
    Into,
    Out,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Over => "over",
            StepType::Into => "into",
            StepType::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    #[default]
    Basic,
    Detailed,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StepAndAnalyzeArgs {
    /// "over", "into" or "out" (default: "over")
    #[serde(default)]
    pub step_type: Option<StepType>,
    /// "basic" (stack, registers) or "detailed" (adds locals)
    #[serde(default)]
    pub analysis_depth: Option<AnalysisDepth>,
}

// ============================================================================
// analyze_context
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    #[default]
    Full,
    Stack,
    Memory,
    Process,
}

impl ContextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextKind::Full => "full",
            ContextKind::Stack => "stack",
            ContextKind::Memory => "memory",
            ContextKind::Process => "process",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeContextArgs {
    /// "full", "stack", "memory" or "process" (default: "full")
    #[serde(default, rename = "type")]
    pub kind: Option<ContextKind>,
}

// ============================================================================
// dx_visualization
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DxOptions {
    /// Display as a grid (-g)
    pub grid: bool,
    /// Grid cell width (-gc)
    pub grid_cell_size: Option<u32>,
    /// Skip this many container elements (-c)
    pub container_skip: Option<u32>,
    /// Native objects only (-n)
    pub native_only: bool,
    /// Verbose output (-v)
    pub verbose: bool,
    /// Recursion depth (-r), only passed when above 1
    pub recursion_level: Option<u32>,
    /// Format specifier appended as `expr,fmt`, e.g. "x" or "d"
    pub format_specifier: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DxVisualizationArgs {
    /// Debugger data-model expression, e.g. "@$curprocess.Threads"
    pub expression: String,
    #[serde(default)]
    pub options: Option<DxOptions>,
    /// Timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// load_symbols
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    /// User-mode symbols only
    User,
    #[default]
    All,
}

impl SymbolType {
    /// Extension command that loads this set
    pub fn command(self) -> &'static str {
        match self {
            SymbolType::User => "loadusersymbols",
            SymbolType::All => "loadallsymbols",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SymbolType::User => "user-mode symbols",
            SymbolType::All => "all symbols",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoadSymbolsArgs {
    /// "user" or "all" (default: "all")
    #[serde(default)]
    pub symbol_type: Option<SymbolType>,
    /// Timeout in milliseconds (default: 30000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// connection_status
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConnectionStatusArgs {}
