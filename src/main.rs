use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tipwatch::defaults::{load_config, SupervisorConfig};
use tipwatch::detector::ChangeDetector;
use tipwatch::git::GitWorkspace;
use tipwatch::github::GitHubClient;
use tipwatch::process::{ProcessGroupController, ShellSpawner};
use tipwatch::runner::DeployRunner;
use tipwatch::state::SupervisorState;
use tipwatch::supervisor::Supervisor;
use tipwatch::{Error, Result};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tipwatch")]
#[command(version = VERSION)]
#[command(about = "Redeploy a service every time its tracked branch moves")]
struct Cli {
    /// Hosting API token used to read the branch tip
    #[arg(long, env = "TIPWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Shell command that deploys and runs the service
    #[arg(long, env = "TIPWATCH_DEPLOY")]
    deploy: Option<String>,

    /// Working copy to watch, pull, and deploy from
    #[arg(long, default_value = ".")]
    repo_dir: String,

    /// JSON file with supervisor tunables
    #[arg(long)]
    config: Option<String>,

    /// Hosting API base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,
}

/// Arguments that survived validation.
struct Settings {
    token: String,
    deploy: String,
    repo_dir: PathBuf,
    config: SupervisorConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = err.code.as_str(), "{}", err);
            for hint in &err.hints {
                error!("hint: {}", hint.message);
            }
            ExitCode::from(err.code.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = settings(cli)?;
    let config = &settings.config;

    info!(
        version = VERSION,
        repo_dir = %settings.repo_dir.display(),
        poll_secs = config.poll_interval_secs,
        retry_secs = config.retry_delay_secs,
        "tipwatch starting"
    );

    let state = Arc::new(SupervisorState::new());
    let workspace = Arc::new(GitWorkspace::new(settings.repo_dir.clone()));
    let source = Arc::new(GitHubClient::new(
        settings.token,
        config.api_url.clone(),
        config.request_timeout(),
    )?);

    let controller = Arc::new(ProcessGroupController::new(
        Arc::clone(&state),
        Arc::new(ShellSpawner::new(config.shell.clone())),
        settings.repo_dir,
        config.port_release_pause(),
    ));
    let runner = Arc::new(DeployRunner::new(
        workspace.clone(),
        Arc::clone(&controller),
        settings.deploy,
        config.retry_delay(),
    ));
    let detector = ChangeDetector::new(workspace, source, Arc::clone(&state));
    let supervisor = Supervisor::new(state, detector, controller, runner, config.poll_interval());

    let shutdown = CancellationToken::new();
    let cancel_on_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_on_signal.cancel();
    });

    supervisor.run(shutdown).await;
    info!("tipwatch stopped");
    Ok(())
}

fn settings(cli: Cli) -> Result<Settings> {
    let token = non_empty(cli.token);
    let deploy = non_empty(cli.deploy);

    let (token, deploy) = match (token, deploy) {
        (Some(token), Some(deploy)) => (token, deploy),
        (token, deploy) => {
            let mut missing = Vec::new();
            if token.is_none() {
                missing.push("--token".to_string());
            }
            if deploy.is_none() {
                missing.push("--deploy".to_string());
            }
            return Err(Error::validation_missing_argument(missing)
                .with_hint("Pass the flag or set TIPWATCH_TOKEN / TIPWATCH_DEPLOY"));
        }
    };

    let config_path = cli.config.as_deref().map(expand_path);
    let mut config = load_config(config_path.as_deref())?;
    if let Some(api_url) = non_empty(cli.api_url) {
        config.api_url = Some(api_url);
        config.validate()?;
    }

    let repo_dir = expand_path(&cli.repo_dir);
    if !repo_dir.is_dir() {
        return Err(Error::config_invalid_value(
            "repo_dir",
            Some(repo_dir.display().to_string()),
            "is not a directory",
        ));
    }

    Ok(Settings {
        token,
        deploy,
        repo_dir,
        config,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
