//! OptiAgent - invoice fraud-analysis agents
//!
//! A CLI tool that manages fraud-analysis agents, runs their invoices
//! through the remote detection engine and reports the outcomes.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unknown record, invalid transition, I/O, config, etc.)
//!   2 - `analyze` ran but the engine call failed and the execution was marked FAILED

mod cli;
mod config;

use anyhow::{anyhow, Context, Result};
use cli::{AgentCommand, Args, Command, ExecCommand, OutputFormat, UserCommand};
use config::{Config, CONFIG_FILE};
use optiagent::documents::{read_upload, DocumentScanner, ImportConfig};
use optiagent::engine::EngineClient;
use optiagent::models::{Agent, Execution, MissionDetails, RawPayload, User};
use optiagent::pipeline::AnalysisOutcome;
use optiagent::report::{generate_json_report, generate_markdown_report, ReportDocument};
use optiagent::{Pipeline, Store};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("OptiAgent v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .optiagent.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the engine URL, data file, report placeholder and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load the snapshot, run the command, save if it changed anything.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let data_file = config.general.data_file.clone();
    let store = Arc::new(
        Store::load(&data_file)
            .with_context(|| format!("Failed to load data file {}", data_file.display()))?,
    );
    let pipeline = Pipeline::new(store.clone());

    let command = args
        .command
        .clone()
        .ok_or_else(|| anyhow!("A subcommand is required"))?;

    let exit_code = match command {
        Command::User { action } => handle_user(&pipeline, action)?,
        Command::Agent { action } => handle_agent(&pipeline, &config, action)?,
        Command::Exec { action } => handle_exec(&pipeline, action)?,
        Command::Submit { execution, payload } => handle_submit(&pipeline, &execution, &payload)?,
        Command::Analyze { agent, user } => {
            handle_analyze(&pipeline, &config, &agent, user, !args.quiet).await?
        }
        Command::Report {
            execution,
            agent,
            user,
            format,
            output,
        } => {
            let document = match (execution, agent, user) {
                (Some(id), _, _) => ReportDocument::for_execution(&pipeline, &id)?,
                (None, Some(id), _) => ReportDocument::for_agent(&pipeline, &id)?,
                (None, None, Some(id)) => ReportDocument::for_user(&pipeline, &id)?,
                (None, None, None) => return Err(anyhow!("Nothing to report on")),
            };
            let rendered = match format.unwrap_or(config.report.format) {
                OutputFormat::Json => generate_json_report(&document)?,
                OutputFormat::Markdown => {
                    generate_markdown_report(&document, &config.report.placeholder)
                }
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, &rendered)
                        .with_context(|| format!("Failed to write report to {}", path.display()))?;
                    println!("✅ Report saved to: {}", path.display());
                }
                None => print!("{}", rendered),
            }
            0
        }
    };

    if args.is_mutating() {
        store
            .save(&data_file)
            .with_context(|| format!("Failed to save data file {}", data_file.display()))?;
    }

    Ok(exit_code)
}

fn handle_user(pipeline: &Pipeline, action: UserCommand) -> Result<i32> {
    match action {
        UserCommand::Add { name, email } => {
            let user = pipeline.users().add(&name, &email)?;
            println!("✅ Created user {} <{}>: {}", user.name, user.email, user.id);
        }
        UserCommand::List => {
            let users = pipeline.users().list();
            if users.is_empty() {
                println!("No users.");
            }
            for user in users {
                print_user(&user);
            }
        }
        UserCommand::Show { id } => {
            let user = match pipeline.users().find_by_email(&id) {
                Some(user) => user,
                None => pipeline.users().get(&id)?,
            };
            print_user(&user);
        }
        UserCommand::Update { id, name, email } => {
            let user = pipeline
                .users()
                .update(&id, name.as_deref(), email.as_deref())?;
            println!("✅ Updated user {} <{}>", user.name, user.email);
        }
        UserCommand::Recompute { id } => {
            let stats = pipeline.recompute_statistics(&id)?;
            println!("📊 Statistics recomputed for {}", id);
            println!(
                "   Agents: {} | Executions: {} | Successful: {} | Failed: {}",
                stats.total_agents,
                stats.total_executions,
                stats.successful_executions,
                stats.failed_executions
            );
        }
        UserCommand::Delete { id } => {
            let removal = pipeline.delete_user(&id)?;
            println!(
                "🗑️  Deleted user {} with {} agent(s), {} execution(s), {} report(s)",
                removal.user.email, removal.agents, removal.executions, removal.reports
            );
        }
    }
    Ok(0)
}

fn handle_agent(pipeline: &Pipeline, config: &Config, action: AgentCommand) -> Result<i32> {
    match action {
        AgentCommand::Create { name, role, user } => {
            if let Some(user) = &user {
                pipeline.users().get(user)?;
            }
            let agent = pipeline.agents().create(&name, &role, user.as_deref())?;
            println!("✅ Created agent {}: {}", agent.name, agent.id);
        }
        AgentCommand::List { user } => {
            let agents = match user {
                Some(user) => pipeline.agents().list_by_user(&user),
                None => pipeline.agents().list_all(),
            };
            if agents.is_empty() {
                println!("No agents.");
            }
            for agent in &agents {
                print_agent(agent);
            }
        }
        AgentCommand::Show { id } => {
            let agent = pipeline.agents().get(&id)?;
            print_agent(&agent);
            for invoice in pipeline.agents().invoices(&id)? {
                println!(
                    "     📄 {} {} ({}, {} bytes)",
                    invoice.id,
                    invoice.file_name,
                    invoice.content_type,
                    invoice.data.len()
                );
            }
            if let Some(order) = pipeline.agents().mission_order(&id)? {
                let mission = order.mission.unwrap_or_default();
                println!(
                    "     📋 Mission order {} ({})",
                    order.file_name,
                    mission.mission_name.as_deref().unwrap_or("unnamed")
                );
            }
            println!(
                "   Executions: {}",
                pipeline.executions().list_by_agent(&id).len()
            );
        }
        AgentCommand::Update { id, name, role } => {
            let agent = pipeline
                .agents()
                .update(&id, name.as_deref(), role.as_deref())?;
            println!("✅ Updated agent {}", agent.id);
        }
        AgentCommand::Delete { id } => {
            let removal = pipeline.delete_agent(&id)?;
            println!(
                "🗑️  Deleted agent {} with {} execution(s), {} report(s)",
                removal.agent.name, removal.executions, removal.reports
            );
        }
        AgentCommand::AddInvoices { id, dir } => {
            pipeline.agents().get(&id)?;
            let scanner = DocumentScanner::new(ImportConfig::from(&config.import));
            let uploads = scanner.collect_uploads(&dir)?;
            if uploads.is_empty() {
                warn!("No invoice files found under {}", dir.display());
            }

            let mut attached = 0;
            for upload in uploads {
                if pipeline.agents().add_invoice(&id, upload)?.is_some() {
                    attached += 1;
                }
            }
            println!("✅ Attached {} invoice(s) to agent {}", attached, id);
        }
        AgentCommand::RemoveInvoice { id, document } => {
            if pipeline.agents().remove_invoice(&id, &document)? {
                println!("🗑️  Removed invoice {} from agent {}", document, id);
            } else {
                println!("⚠️  Agent {} has no invoice {}", id, document);
            }
        }
        AgentCommand::RemoveMission { id } => {
            if pipeline.agents().remove_mission_order(&id)? {
                println!("🗑️  Removed the mission order of agent {}", id);
            } else {
                println!("⚠️  Agent {} has no mission order", id);
            }
        }
        AgentCommand::SetMission {
            id,
            file,
            mission_name,
            client,
            start_date,
            end_date,
            description,
        } => {
            let upload = read_upload(&file)?;
            let details = MissionDetails {
                mission_name,
                client_name: client,
                start_date,
                end_date,
                description,
            };
            match pipeline.agents().set_mission_order(&id, upload, details)? {
                Some(order) => println!("✅ Mission order {} attached to agent {}", order.file_name, id),
                None => println!("⚠️  {} is empty, mission order unchanged", file.display()),
            }
        }
    }
    Ok(0)
}

fn handle_exec(pipeline: &Pipeline, action: ExecCommand) -> Result<i32> {
    match action {
        ExecCommand::Start { agent, user } => {
            let user = attributed_user(pipeline, &agent, user)?;
            let execution = pipeline.start_execution(&agent, user.as_deref())?;
            println!("▶️  Started execution {}", execution.id);
        }
        ExecCommand::Fail { id, message } => {
            let execution = pipeline.fail_execution(&id, &message)?;
            println!("✅ Execution {} is now {}", execution.id, execution.status);
        }
        ExecCommand::List { agent, user } => {
            let executions = match (agent, user) {
                (Some(agent), _) => pipeline.executions().list_by_agent(&agent),
                (None, Some(user)) => pipeline.executions().list_by_user(&user),
                (None, None) => pipeline.executions().list_all(),
            };
            if executions.is_empty() {
                println!("No executions.");
            }
            for execution in &executions {
                print_execution(execution);
            }
        }
        ExecCommand::Show { id } => {
            let execution = pipeline.executions().get(&id)?;
            print_execution(&execution);
            if let Some(result) = &execution.result {
                println!("   Result: {}", result);
            }
            if let Some(notes) = &execution.notes {
                println!("   Notes: {}", notes);
            }
            println!(
                "   Reports: {}",
                pipeline.results().list_by_execution(&id).len()
            );
        }
        ExecCommand::Delete { id } => {
            if !pipeline.delete_execution(&id) {
                return Err(anyhow!("Execution not found: {}", id));
            }
            println!("🗑️  Deleted execution {}", id);
        }
    }
    Ok(0)
}

fn handle_submit(pipeline: &Pipeline, execution_id: &str, payload_path: &Path) -> Result<i32> {
    let raw = read_payload(payload_path)?;
    let report = pipeline.submit_payload(execution_id, raw)?;

    println!("✅ Recorded report {} (fraud: {})", report.id, report.verdict());
    if let Some(merchant) = &report.fields().merchant_name {
        println!("   Merchant: {}", merchant);
    }
    Ok(0)
}

async fn handle_analyze(
    pipeline: &Pipeline,
    config: &Config,
    agent_id: &str,
    user: Option<String>,
    show_progress: bool,
) -> Result<i32> {
    let user = attributed_user(pipeline, agent_id, user)?;
    let client = EngineClient::new(config.engine_config(show_progress))?;

    println!("🔬 Analyzing invoices of agent {}...", agent_id);
    println!("   Engine: {}", client.config().endpoint());

    match pipeline.analyze(&client, agent_id, user.as_deref()).await? {
        AnalysisOutcome::Recorded(report) => {
            let fields = report.fields();
            println!("\n📊 Analysis recorded in execution {}", report.execution_id);
            println!("   Fraud: {}", report.verdict());
            if !fields.fraud_reasons.is_empty() {
                println!("   Reasons: {}", fields.fraud_reasons.join(", "));
            }
            Ok(0)
        }
        AnalysisOutcome::Failed(execution) => {
            eprintln!(
                "\n⛔ Execution {} failed: {}",
                execution.id,
                execution.notes.as_deref().unwrap_or("")
            );
            Ok(2)
        }
    }
}

/// Explicit user, or the agent's owner.
fn attributed_user(pipeline: &Pipeline, agent_id: &str, user: Option<String>) -> Result<Option<String>> {
    match user {
        Some(user) => {
            pipeline.users().get(&user)?;
            Ok(Some(user))
        }
        None => Ok(pipeline.agents().get(agent_id)?.user_id),
    }
}

/// Read a raw payload file. It must hold a JSON object.
fn read_payload(path: &Path) -> Result<RawPayload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file {}", path.display()))?;
    match serde_json::from_str::<Value>(&content)
        .with_context(|| format!("Failed to parse payload file {}", path.display()))?
    {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("Payload must be a JSON object: {}", path.display())),
    }
}

fn print_user(user: &User) {
    let stats = user.statistics;
    println!("👤 {} <{}> {}", user.name, user.email, user.id);
    println!(
        "   Agents: {} | Executions: {} | Successful: {} | Failed: {} | Pending: {}",
        stats.total_agents,
        stats.total_executions,
        stats.successful_executions,
        stats.failed_executions,
        stats.pending_executions()
    );
}

fn print_agent(agent: &Agent) {
    println!(
        "🤖 {} ({}) {} | invoices: {} | owner: {}",
        agent.name,
        if agent.role.is_empty() { "-" } else { agent.role.as_str() },
        agent.id,
        agent.invoice_file_ids.len(),
        agent.user_id.as_deref().unwrap_or("-")
    );
}

fn print_execution(execution: &Execution) {
    println!(
        "{} {} agent {} started {}",
        execution.status,
        execution.id,
        execution.agent_id,
        execution.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
