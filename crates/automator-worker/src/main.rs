mod task_io;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use node_automator::{AutomatorConfig, ProviderName, TaskResult, build_automator};
use tracing_subscriber::EnvFilter;

/// Run one node lifecycle task and print its result as JSON.
#[derive(Parser, Debug)]
#[command(name = "automator-worker", version, about)]
struct Cli {
    /// Provider backend (joyent, hetzner)
    #[arg(short, long, env = "AUTOMATOR_PROVIDER")]
    provider: Option<String>,

    /// Task JSON file; stdin when omitted or `-`
    #[arg(short, long)]
    task: Option<PathBuf>,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the result
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the result document; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = run(&cli).await;

    let written = match &cli.output {
        Some(path) => std::fs::File::create(path)
            .map_err(node_automator::Error::from)
            .and_then(|mut file| task_io::write_result(&mut file, &result, cli.pretty)),
        None => task_io::write_result(&mut std::io::stdout().lock(), &result, cli.pretty),
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "failed to write result");
        return ExitCode::FAILURE;
    }

    ExitCode::from(result.status().code())
}

async fn run(cli: &Cli) -> TaskResult {
    let provider = match resolve_provider(cli.provider.as_deref()) {
        Ok(p) => p,
        Err(e) => return TaskResult::failure(e.to_string()),
    };

    let config = match AutomatorConfig::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => return TaskResult::failure(format!("{provider}: {e}")),
    };

    let task = match task_io::read_task(cli.task.as_deref()) {
        Ok(t) => t,
        Err(e) => return TaskResult::failure(format!("{provider}: {e}")),
    };

    tracing::info!(
        %provider,
        operation = %task.operation,
        task_id = task.task_id.as_deref().unwrap_or("-"),
        "running task"
    );

    build_automator(provider, config).run(&task).await
}

/// A missing provider is reported in the result document, not by clap.
fn resolve_provider(name: Option<&str>) -> node_automator::Result<ProviderName> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.parse(),
        None => Err(node_automator::Error::UnknownProvider(
            "none given (use --provider or AUTOMATOR_PROVIDER)".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_flag_is_optional() {
        let cli = Cli::try_parse_from(["automator-worker", "--pretty"]).unwrap();
        assert!(cli.pretty);
    }

    #[test]
    fn missing_provider_becomes_failure_document() {
        let err = resolve_provider(None).unwrap_err();
        let result = TaskResult::failure(err.to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], 1);
        assert!(json["stderr"].as_str().unwrap().contains("AUTOMATOR_PROVIDER"));

        assert!(resolve_provider(Some("  ")).is_err());
    }

    #[test]
    fn provider_names_resolve() {
        assert_eq!(resolve_provider(Some("hetzner")).unwrap(), ProviderName::Hetzner);
        assert!(resolve_provider(Some("aws")).is_err());
    }
}
