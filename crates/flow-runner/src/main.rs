use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use flow_engine::{
    validate_workflow, EngineConfig, EngineError, ExecutionCoordinator, FnEventSink,
    WorkflowEvent, WorkflowGraph,
};

#[derive(Parser)]
#[command(name = "flow-runner", version, about = "Run and validate workflow graphs")]
struct Cli {
    /// Path to engine config file (defaults apply when missing)
    #[arg(short, long, global = true, env = "FLOW_ENGINE_CONFIG", default_value = "flow-engine.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow graph and print its result as JSON
    Run {
        /// Workflow graph JSON file
        graph: PathBuf,
        /// Execute only this node, using results already stored in the graph
        #[arg(long)]
        node: Option<String>,
        /// Print every workflow event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Check a workflow graph for structural errors
    Validate {
        /// Workflow graph JSON file
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, EngineError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run {
            graph,
            node,
            events,
        } => run(&graph, node.as_deref(), events, config).await,
        Commands::Validate { graph } => validate(&graph, config).await,
    }
}

async fn load_graph(path: &Path) -> Result<WorkflowGraph, EngineError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let graph: WorkflowGraph = serde_json::from_str(&contents)?;
    log::debug!(
        "Loaded workflow '{}' from {:?}: {} nodes, {} connections",
        graph.id,
        path,
        graph.nodes.len(),
        graph.connections.len()
    );
    Ok(graph)
}

async fn run(
    path: &Path,
    node: Option<&str>,
    print_events: bool,
    config: EngineConfig,
) -> Result<ExitCode, EngineError> {
    let mut graph = load_graph(path).await?;
    let coordinator = Arc::new(ExecutionCoordinator::with_config(config));

    let sink = FnEventSink(move |event: WorkflowEvent| {
        if !print_events {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize event: {}", e),
        }
    });

    if let Some(node_id) = node {
        let value = coordinator.execute_node(node_id, &mut graph, &sink).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(ExitCode::SUCCESS);
    }

    let stopper = Arc::clone(&coordinator);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping after the current node");
            stopper.stop();
        }
    });

    let result = coordinator.run(&mut graph, &sink).await;
    ctrl_c.abort();
    let result = result?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn validate(path: &Path, config: EngineConfig) -> Result<ExitCode, EngineError> {
    let graph = load_graph(path).await?;
    let report = validate_workflow(&graph, &config.validation);

    for warning in report.warning_messages() {
        println!("warning: {}", warning);
    }
    for error in report.error_messages() {
        println!("error: {}", error);
    }

    if report.is_ok() {
        println!(
            "Workflow '{}' is valid ({} nodes)",
            graph.id,
            graph.nodes.len()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
