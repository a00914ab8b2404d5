//! Clap derive structures for the `labelval` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// labelval -- drive barcode verification nodes from the command line
#[derive(Debug, Parser)]
#[command(
    name = "labelval",
    version,
    about = "Drive barcode verification nodes from the command line",
    long_about = "Connects to a print-quality verification node, follows its event\n\
        stream, and runs inspections, sector detection, mode switches and\n\
        print-and-verify runs over a roll of label images.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct GlobalOpts {
    /// Node profile to use
    #[arg(long, short = 'p', env = "LABELVAL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Verification system host (overrides profile)
    #[arg(long, short = 'H', env = "LABELVAL_HOST", global = true)]
    pub host: Option<String>,

    /// Node number on the system, starting at 1
    #[arg(long, short = 'n', env = "LABELVAL_NODE", global = true)]
    pub node: Option<u16>,

    /// Port of the system service
    #[arg(long, env = "LABELVAL_SYSTEM_PORT", global = true)]
    pub system_port: Option<u16>,

    /// Port of the node service (defaults to 8080 + node number)
    #[arg(long, env = "LABELVAL_NODE_PORT", global = true)]
    pub node_port: Option<u16>,

    /// Login name
    #[arg(long, short = 'u', env = "LABELVAL_USERNAME", global = true)]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "LABELVAL_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Log in with a monitor session instead of a control session
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "LABELVAL_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// HTTP request timeout in seconds (overrides profile)
    #[arg(long, env = "LABELVAL_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the nodes attached to the verification system
    Devices,

    /// Show the node's state, loaded job and session
    #[command(alias = "st")]
    Status,

    /// Show the loaded job and its sectors
    Job,

    /// Show the node's camera calibration
    Calibration,

    /// Capture and grade a repeat in the editor
    Inspect(InspectArgs),

    /// Auto-detect barcode sectors on the current image
    Detect(DetectArgs),

    /// Switch the node into the editor
    Edit(WaitArgs),

    /// Switch the node into run mode with its loaded job
    RunMode(WaitArgs),

    /// Fetch the report and image for a repeat
    Read(ReadArgs),

    /// Enable or disable printing on the node
    Print(PrintArgs),

    /// Manage the loaded job's verification sectors
    #[command(alias = "sec")]
    Sectors(SectorsArgs),

    /// Stream inspection events until interrupted
    Watch(WatchArgs),

    /// Print and verify a roll of label images
    Run(RunArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

impl Command {
    /// Commands that never change node state log in as monitor.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Status | Self::Job | Self::Calibration | Self::Watch(_)
        )
    }
}

// ── Node operations ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// How long to wait for the node to confirm (e.g. "10s")
    #[arg(long)]
    pub wait: Option<humantime::Duration>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Repeat to inspect; 0 captures a new one
    #[arg(default_value = "0")]
    pub repeat: u32,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Repeat to read; 0 reads the most recent one
    #[arg(default_value = "0")]
    pub repeat: u32,

    /// Write the repeat image to this file
    #[arg(long)]
    pub image_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Args)]
pub struct PrintArgs {
    pub state: Toggle,
}

// ── Sectors ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SectorsArgs {
    #[command(subcommand)]
    pub command: SectorsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SectorsCommand {
    /// List the loaded job's sectors
    #[command(alias = "ls")]
    List,

    /// Delete every sector from the loaded job
    Clear,

    /// Add one sector from a JSON file
    Add {
        /// Sector name
        name: String,
        /// JSON file holding the sector definition
        #[arg(long, short = 'f')]
        from_file: PathBuf,
    },

    /// Detect symbols and turn them into sector definitions
    Create {
        /// Grading standard, e.g. "GS1 TABLE 1"
        #[arg(long, short = 's', default_value = "")]
        standard: String,

        /// Replace the job's sectors with the created ones
        #[arg(long)]
        apply: bool,

        #[command(flatten)]
        wait: WaitArgs,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many events
    #[arg(long, short = 'c')]
    pub count: Option<usize>,

    /// Hide heartbeat events
    #[arg(long)]
    pub no_heartbeats: bool,
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Roll manifest (TOML) listing the images and their stored templates
    pub manifest: PathBuf,

    /// Number of passes over the roll
    #[arg(long, short = 'l', default_value = "1")]
    pub loops: u32,

    /// Program that prints one image; receives the image path as its last argument
    #[arg(long, env = "LABELVAL_PRINT_COMMAND")]
    pub print_command: Option<String>,

    /// Extra arguments passed to the print program before the image path
    #[arg(long = "print-arg", allow_hyphen_values = true)]
    pub print_args: Vec<String>,

    /// Directory to write per-image reports and images into
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Only check which images lack stored sectors, then exit
    #[arg(long)]
    pub check: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the resolved configuration (passwords redacted)
    Show,

    /// Add or replace a profile
    AddProfile {
        /// Profile name
        name: String,
        /// Verification system host
        #[arg(long)]
        host: String,
        /// Node number
        #[arg(long, default_value = "1")]
        node_number: u16,
        /// Login name
        #[arg(long)]
        username: Option<String>,
        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Store the active profile's password in the system keyring
    SetPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
