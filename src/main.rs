use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use perevod::api::Download;
use perevod::app::{Workspace, quota_limit};
use perevod::auth::{AuthState, Credential, CredentialKind};
use perevod::cli::{Cli, Command};
use perevod::config::{API_URL_ENV, ClientConfig};
use perevod::error::ClientError;
use perevod::jobs::{JobRegistry, PendingUpload};
use perevod::operation::any_pending;
use perevod::payment::PaymentReference;
use perevod::poller::PollPhase;
use perevod::ui;

// Tentativas de digitar o código recebido por email.
const OTP_ATTEMPTS: usize = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut workspace = match open_workspace(&cli) {
        Ok(workspace) => workspace,
        Err(err) => {
            ui::print_error(&format!("{err:#}"));
            return ExitCode::FAILURE;
        }
    };

    match run(&mut workspace, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(
                err.downcast_ref::<ClientError>(),
                Some(ClientError::Unauthenticated)
            ) {
                workspace.invalidate();
                ui::print_forced_logout();
            } else {
                ui::print_error(&format!("{err:#}"));
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("perevod={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn open_workspace(cli: &Cli) -> Result<Workspace> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            if let Ok(url) = std::env::var(API_URL_ENV) {
                config.apply_api_url(&url);
            }
            config
        }
        None => ClientConfig::load()?,
    };
    if let Some(url) = &cli.api_url {
        config.apply_api_url(url);
    }
    debug!(api_url = %config.api_url, "configuration loaded");
    Ok(Workspace::open(config)?)
}

async fn run(workspace: &mut Workspace, command: Command) -> Result<()> {
    match command {
        Command::Login { code, name, email } => {
            let credential = match (name, email) {
                (Some(name), Some(email)) => Credential::InviteWithProfile { code, name, email },
                _ => Credential::Invite { code },
            };
            let registry = workspace.login(credential).await?;
            ui::print_success("Logged in");
            ui::print_jobs(&registry.jobs());
        }

        Command::LoginOtp { email } => {
            let session = login_with_code(workspace, &email).await?;
            let registry = workspace.adopt(session).await?;
            ui::print_success("Logged in");
            ui::print_jobs(&registry.jobs());
        }

        Command::Logout => {
            workspace.logout()?;
            ui::print_success("Logged out");
        }

        Command::Status => {
            let user = workspace.user_info().await?;
            let registry = workspace.job_registry()?;
            let refreshed = registry.refresh().await;
            workspace.guard(refreshed)?;
            let quota = quota_limit(&user).map(|limit| registry.quota(limit));
            ui::print_status(&user, quota);
        }

        Command::Jobs { watch } => {
            let mut registry = workspace.job_registry()?;
            let refreshed = registry.refresh().await;
            let jobs = workspace.guard(refreshed)?;
            if watch && any_pending(&jobs) {
                watch_jobs(workspace, &mut registry).await?;
            } else {
                ui::print_jobs(&jobs);
            }
        }

        Command::Upload {
            file,
            glossary,
            no_watch,
        } => {
            let glossary = glossary
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("reading glossary {}", path.display()))
                })
                .transpose()?;
            let upload = PendingUpload::from_path(&file, glossary, workspace.config().max_upload_bytes)?;

            let mut registry = workspace.job_registry()?;
            let submitted = registry.submit(upload).await;
            let job = workspace.guard(submitted)?;
            ui::print_success(&format!("Uploaded {}, translation queued", job.label));
            if !no_watch {
                watch_jobs(workspace, &mut registry).await?;
            }
        }

        Command::Download { job_id, output } => {
            let registry = workspace.job_registry()?;
            let refreshed = registry.refresh().await;
            workspace.guard(refreshed)?;
            let resolved = registry.resolve_download(&job_id).await;
            match workspace.guard(resolved)? {
                Download::Bytes(bytes) => {
                    let label = registry.get(&job_id).map(|j| j.label).unwrap_or(job_id);
                    let path = output.unwrap_or_else(|| default_output(&label));
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    ui::print_success(&format!("Saved {}", path.display()));
                }
                Download::Redirect(url) => {
                    ui::print_success(&format!("Download the translation from {url}"));
                }
            }
        }

        Command::Buy {
            tier,
            provider,
            asset,
            email,
        } => {
            let url = workspace
                .create_checkout(provider.into(), tier.into(), email, asset.map(Into::into))
                .await?;
            ui::print_success(&format!("Open this link to pay: {url}"));
            println!("  After paying, run `perevod payment <return url>` to get your invite code.");
        }

        Command::Payment { return_url } => {
            let reference = PaymentReference::from_return_url(&return_url)?;
            let source = workspace.payment_source(reference.clone());
            let reconciler = workspace.payment_reconciler();

            let progress = ui::PaymentProgress::start(&reference);
            let outcome = tokio::select! {
                outcome = reconciler.reconcile(source) => Some(outcome),
                _ = tokio::signal::ctrl_c() => None,
            };
            progress.finish();

            match outcome {
                Some(receipt) => ui::print_receipt(&receipt?),
                None => println!("  Stopped. Run the same command again to keep checking."),
            }
        }
    }
    Ok(())
}

/// Asks for a code, then lets the user type it a few times.
async fn login_with_code(
    workspace: &Workspace,
    email: &str,
) -> Result<perevod::session::Session> {
    let mut flow = workspace.auth_flow(CredentialKind::EmailOtp);
    flow.request_code(email).await?;
    ui::print_success(&format!("A code was sent to {}", email.trim()));

    let email = flow.code_sent_to().unwrap_or(email).to_string();
    for attempt in 1..=OTP_ATTEMPTS {
        let code = prompt("  Code: ")?;
        match flow
            .submit(Credential::OtpCode {
                email: email.clone(),
                code,
            })
            .await
        {
            Ok(session) => return Ok(session),
            Err(ClientError::CredentialRejected { reason }) if attempt < OTP_ATTEMPTS => {
                ui::print_error(&reason);
            }
            Err(err) => return Err(err.into()),
        }
    }
    debug!(state = ?flow.state(), "code attempts exhausted");
    match flow.state() {
        AuthState::CollectingCredential {
            rejection: Some(rejection),
        } => anyhow::bail!("login failed: {}", rejection.reason),
        _ => anyhow::bail!("login failed"),
    }
}

/// Renders job updates until nothing is pending, the session is rejected or
/// the user presses Ctrl+C.
async fn watch_jobs(workspace: &mut Workspace, registry: &mut JobRegistry) -> Result<()> {
    let mut board = ui::JobBoard::start();
    let watched = tokio::select! {
        phase = workspace.watch_jobs(registry, |view| board.render(view)) => Some(phase),
        _ = tokio::signal::ctrl_c() => None,
    };

    let phase = match watched {
        Some(Ok(phase)) => phase,
        Some(Err(err)) => {
            board.finish(PollPhase::Unauthenticated);
            warn!("job polling stopped: {err}");
            return Err(err.into());
        }
        None => {
            registry.stop();
            PollPhase::Stopped
        }
    };
    board.finish(phase);
    Ok(())
}

fn default_output(label: &str) -> PathBuf {
    let name = Path::new(label)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(label);
    PathBuf::from(format!("translated_{name}.txt"))
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
