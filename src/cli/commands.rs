//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - new/list/show/learnings: directive management
//! - run: execute a task through the orchestrator
//! - escalations/decide/resume: operator hand-off

use clap::{Parser, Subcommand, ValueEnum};
use doe::domain::Decision;
use std::path::PathBuf;

/// Doe - directive-driven task router with self-annealing learnings
#[derive(Parser, Debug)]
#[command(name = "doe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Operator decision on an escalation
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionArg {
    Retry,
    Abort,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Retry => Decision::Retry,
            DecisionArg::Abort => Decision::Abort,
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a skeleton directive for a new task
    New {
        /// Task identifier
        task: String,

        /// What the task is for
        #[arg(short, long)]
        goal: String,
    },

    /// List directives and whether a tool is bound to each
    List,

    /// Print a directive document
    Show {
        /// Task identifier
        task: String,
    },

    /// Print the full learnings history of a directive
    Learnings {
        /// Task identifier
        task: String,
    },

    /// Run a task
    Run {
        /// Task identifier
        task: String,

        /// Input field as key=value (value parsed as JSON when it parses)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Inputs as a JSON object; -i fields are merged on top
        #[arg(long)]
        json: Option<String>,

        /// On escalation, wait for the operator decision and resume
        #[arg(short, long)]
        wait: bool,
    },

    /// List escalations awaiting a decision
    Escalations {
        /// Include decided escalations
        #[arg(short, long)]
        all: bool,
    },

    /// Decide an escalation
    Decide {
        /// Escalation ID
        id: String,

        /// Retry the run or abort it
        #[arg(value_enum)]
        decision: DecisionArg,

        /// Note recorded with the decision (becomes the learning on abort)
        #[arg(short, long)]
        note: Option<String>,

        /// Who decided
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Act on a decided escalation
    Resume {
        /// Escalation ID
        id: String,
    },
}
