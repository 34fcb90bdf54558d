//! chatgate - bearer-token gate for the chat backend

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use chatgate::{
    Error,
    cli::{Cli, Command},
    config::Config,
    jwks::{HttpKeyDirectory, KeyDirectory},
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    match cli.command {
        Some(Command::Keys { format }) => run_keys(&config, &format).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Fetch the JWKS once and print what the gate would accept
async fn run_keys(config: &Config, format: &str) -> ExitCode {
    let jwks_uri = match config.auth.resolve_jwks_uri() {
        Ok(uri) => uri,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let directory = match HttpKeyDirectory::new(jwks_uri, config.auth.jwks_timeout) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return ExitCode::from(Error::from(e).exit_code());
        }
    };

    let keys = match directory.fetch().await {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::from(Error::from(e).exit_code());
        }
    };

    let described = keys.describe();
    if format == "json" {
        let entries: Vec<_> = described
            .iter()
            .map(|(kid, alg)| serde_json::json!({ "kid": kid, "alg": alg }))
            .collect();
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize to JSON: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{} usable key(s) at {}\n", described.len(), directory.jwks_uri());
        for (kid, alg) in &described {
            let alg = alg.as_ref().map_or_else(|| "-".to_string(), |a| format!("{a:?}"));
            println!("  {kid}  {alg}");
        }
    }

    ExitCode::SUCCESS
}

/// Run the server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting chatgate"
    );

    let server = match Server::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::from(e.exit_code());
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
