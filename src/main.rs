//! Dispatch Gateway - control-plane request dispatcher

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info, warn};

use dispatch_gateway::{
    cli::{Cli, Command, OutputFormat},
    config::Config,
    handlers::ToolRegistry,
    intent::{ExecutionPlanner, IntentClassifier, TimeoutTable},
    routing::{HttpMethod, RouteRegistry, default_routes},
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Routes { format }) => load_config(&cli).and_then(|c| print_routes(&c, format)),
        Some(Command::Classify { ref method, ref path }) => {
            load_config(&cli).and_then(|c| print_classification(&c, method, path))
        }
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

fn classifier(config: &Config) -> anyhow::Result<IntentClassifier> {
    let registry = RouteRegistry::with_routes(default_routes().into_iter().chain(config.routes.iter().cloned()))
        .context("Invalid route table")?;
    let timeouts = TimeoutTable::from_config(&config.planner);
    Ok(IntentClassifier::new(Arc::new(registry), ExecutionPlanner::new(timeouts)))
}

fn print_routes(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let patterns = classifier(config)?.all_route_patterns();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&patterns)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&patterns)?),
        OutputFormat::Text => {
            let width = patterns.iter().map(|p| p.path.len()).max().unwrap_or(0);
            for p in &patterns {
                let tools: Vec<&str> = p.tools.iter().map(|t| t.as_str()).collect();
                println!(
                    "{:<7} {:<width$}  {:<32} {:<8} {}",
                    p.method.as_str(),
                    p.path,
                    p.action,
                    p.auth.as_str(),
                    tools.join(", "),
                );
            }
            println!("\n{} routes", patterns.len());
        }
    }
    Ok(())
}

fn print_classification(config: &Config, method: &str, path: &str) -> anyhow::Result<()> {
    let method: HttpMethod = method.parse()?;
    let Some(intent) = classifier(config)?.classify(method, path) else {
        bail!("No route for {method} {path}");
    };
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        extra_routes = config.routes.len(),
        "Starting Dispatch Gateway"
    );
    warn!("No tool invokers registered; tool-backed intents will answer TOOL_FAILED");

    let server = Server::new(config, Arc::new(ToolRegistry::new()))
        .await
        .context("Failed to create server")?;
    server.run().await.context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
