//! CLI command definitions

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve the MCP tools on stdio (the default)
    Serve,

    /// Run one WinDbg command and print its output
    Exec {
        /// Command text, e.g. `lm m ntdll` or `!analyze -v`
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Timeout in milliseconds (default depends on the command)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Check that the extension answers on the pipe
    Probe,
}
