//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// OptiAgent - invoice fraud-analysis agents
///
/// Register agents, attach invoices and mission orders, run analyses
/// against the fraud-detection engine and keep per-user statistics.
///
/// Examples:
///   optiagent user add "Amina B." amina@example.com
///   optiagent agent create "Audit Marrakech" --role controller --user <USER>
///   optiagent agent add-invoices <AGENT> ./receipts
///   optiagent analyze <AGENT>
///   optiagent report --user <USER> --format json --output stats.json
///   optiagent --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .optiagent.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Snapshot file holding users, agents, executions and reports
    #[arg(long, value_name = "FILE", env = "OPTIAGENT_DATA", global = true)]
    pub data: Option<PathBuf>,

    /// Fraud-analysis engine base URL
    #[arg(long, value_name = "URL", env = "OPTIAGENT_ENGINE_URL", global = true)]
    pub engine_url: Option<String>,

    /// Engine request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Generate a default .optiagent.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
    /// Manage agents and their documents
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },
    /// Manage executions
    Exec {
        #[command(subcommand)]
        action: ExecCommand,
    },
    /// Record a raw analysis payload (JSON file) for an execution
    Submit {
        execution: String,
        #[arg(value_name = "PAYLOAD")]
        payload: PathBuf,
    },
    /// Send an agent's documents to the engine and record the outcome
    Analyze {
        agent: String,
        /// User the execution is attributed to (defaults to the agent's owner)
        #[arg(long)]
        user: Option<String>,
    },
    /// Render fraud reports of an execution, an agent or a user
    Report {
        execution: Option<String>,
        #[arg(long, conflicts_with = "execution")]
        agent: Option<String>,
        #[arg(long, conflicts_with_all = ["execution", "agent"])]
        user: Option<String>,
        /// Output format (markdown, json)
        #[arg(long, value_name = "FORMAT")]
        format: Option<OutputFormat>,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    Add { name: String, email: String },
    List,
    /// Show a user, looked up by id or email
    Show { id: String },
    /// Change a user's name or email
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Rebuild a user's statistics from their agents and executions
    Recompute { id: String },
    /// Delete a user with their agents, executions and reports
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommand {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long)]
        user: Option<String>,
    },
    List {
        #[arg(long)]
        user: Option<String>,
    },
    Show { id: String },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Delete an agent with its executions, reports and documents
    Delete { id: String },
    /// Attach every invoice (pdf, png, jpg, jpeg) found under a directory
    AddInvoices { id: String, dir: PathBuf },
    /// Detach and delete one invoice file
    RemoveInvoice { id: String, document: String },
    /// Detach and delete the mission order
    RemoveMission { id: String },
    /// Attach a mission order, replacing the current one
    SetMission {
        id: String,
        file: PathBuf,
        #[arg(long)]
        mission_name: Option<String>,
        #[arg(long)]
        client: Option<String>,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long, value_parser = parse_date)]
        start_date: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_date)]
        end_date: Option<DateTime<Utc>>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExecCommand {
    Start {
        agent: String,
        #[arg(long)]
        user: Option<String>,
    },
    Fail { id: String, message: String },
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, conflicts_with = "agent")]
        user: Option<String>,
    },
    Show { id: String },
    /// Delete an execution and its reports
    Delete { id: String },
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Accept a calendar date (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| format!("Invalid date: {}", value));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("Expected YYYY-MM-DD or RFC 3339, got '{}'", value))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        let command = match &self.command {
            Some(command) => command,
            None => return Err("A subcommand is required (try --help)".to_string()),
        };

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(url) = &self.engine_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Engine URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        match command {
            Command::Report {
                execution,
                agent,
                user,
                ..
            } => {
                if execution.is_none() && agent.is_none() && user.is_none() {
                    return Err(
                        "Report needs an execution id, --agent or --user".to_string(),
                    );
                }
            }
            Command::Submit { payload, .. } => {
                if !payload.is_file() {
                    return Err(format!("Payload file not found: {}", payload.display()));
                }
            }
            Command::Agent {
                action: AgentCommand::AddInvoices { dir, .. },
            } => {
                if !dir.is_dir() {
                    return Err(format!("Not a directory: {}", dir.display()));
                }
            }
            Command::Agent {
                action:
                    AgentCommand::SetMission {
                        file,
                        start_date,
                        end_date,
                        ..
                    },
            } => {
                if !file.is_file() {
                    return Err(format!("Mission order file not found: {}", file.display()));
                }
                if let (Some(start), Some(end)) = (start_date, end_date) {
                    if end < start {
                        return Err("Mission end date is before its start date".to_string());
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Whether the command changes the store and needs a save afterwards.
    pub fn is_mutating(&self) -> bool {
        match &self.command {
            Some(Command::User { action }) => !matches!(
                action,
                UserCommand::List | UserCommand::Show { .. }
            ),
            Some(Command::Agent { action }) => !matches!(
                action,
                AgentCommand::List { .. } | AgentCommand::Show { .. }
            ),
            Some(Command::Exec { action }) => !matches!(
                action,
                ExecCommand::List { .. } | ExecCommand::Show { .. }
            ),
            Some(Command::Submit { .. }) | Some(Command::Analyze { .. }) => true,
            Some(Command::Report { .. }) | None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_subcommand_parsing() {
        let args = parse(&["optiagent", "exec", "fail", "e1", "engine down", "-v"]);
        assert!(args.verbose);
        match args.command {
            Some(Command::Exec {
                action: ExecCommand::Fail { id, message },
            }) => {
                assert_eq!(id, "e1");
                assert_eq!(message, "engine down");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_validation_requires_command() {
        let args = parse(&["optiagent"]);
        assert!(args.validate().is_err());

        let args = parse(&["optiagent", "--init-config"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_report_target() {
        let args = parse(&["optiagent", "report"]);
        assert!(args.validate().is_err());

        let args = parse(&["optiagent", "report", "--user", "u1", "--format", "json"]);
        assert!(args.validate().is_ok());
        assert!(Args::try_parse_from(["optiagent", "report", "e1", "--agent", "a1"]).is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["optiagent", "user", "list", "--verbose", "--quiet"]);
        assert!(args.validate().is_err());

        let args = parse(&["optiagent", "user", "list", "--engine-url", "ftp://engine"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date("2025-04-14").unwrap();
        assert_eq!(date.to_rfc3339(), "2025-04-14T00:00:00+00:00");
        assert!(parse_date("2025-04-14T08:30:00+01:00").is_ok());
        assert!(parse_date("14/04/2025").is_err());
    }

    #[test]
    fn test_is_mutating() {
        assert!(parse(&["optiagent", "user", "add", "A", "a@example.com"]).is_mutating());
        assert!(!parse(&["optiagent", "agent", "list"]).is_mutating());
        assert!(!parse(&["optiagent", "report", "e1"]).is_mutating());
        assert!(parse(&["optiagent", "analyze", "a1"]).is_mutating());
        assert!(parse(&["optiagent", "user", "update", "u1", "--email", "b@example.com"]).is_mutating());
        assert!(parse(&["optiagent", "agent", "remove-invoice", "a1", "d1"]).is_mutating());
        assert!(!parse(&["optiagent", "user", "show", "a@example.com"]).is_mutating());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["optiagent", "user", "list"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
