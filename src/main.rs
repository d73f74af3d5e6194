use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskmailer::channels::cli::{self, CliArgs};
use taskmailer::channels::{ImapMailbox, MailLoop, SmtpMailer, spawn_mail_loop};
use taskmailer::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_TASKS_PATH, LoggingSettings};
use taskmailer::documents::FileExtractor;
use taskmailer::pipeline::{TaskCatalog, TaskDispatcher};
use taskmailer::store::RateLimiter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Install rustls crypto provider before any TLS usage. An error only
    // means another provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config_path = resolve_path(args.config.as_deref(), "TASKMAILER_CONFIG", DEFAULT_CONFIG_PATH);
    let tasks_path = resolve_path(args.tasks.as_deref(), "TASKMAILER_TASKS", DEFAULT_TASKS_PATH);

    let (config, catalog) = match load(&config_path, &tasks_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.logging);

    // Parser panics are contained by their callers; keep them out of the
    // terminal and in the log.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Worker panicked");
    }));

    match run(args, config, catalog).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_path(flag: Option<&Path>, env_key: &str, default: &str) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(env_key).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn load(config_path: &Path, tasks_path: &Path) -> anyhow::Result<(AppConfig, TaskCatalog)> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let catalog = TaskCatalog::load(tasks_path)
        .with_context(|| format!("Failed to load tasks from {}", tasks_path.display()))?;
    Ok((config, catalog))
}

/// `RUST_LOG` wins over the configured level. With `logging.file` set,
/// output goes to that file through a non-blocking writer.
fn init_tracing(logging: &LoggingSettings) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "taskmailer.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn run(args: CliArgs, config: AppConfig, catalog: TaskCatalog) -> anyhow::Result<ExitCode> {
    let mut stdout = std::io::stdout();

    if args.list_tasks {
        cli::list_tasks(&catalog, &mut stdout)?;
        return Ok(ExitCode::SUCCESS);
    }

    // ── CLI mode ─────────────────────────────────────────────────────
    if let Some(request) = args.request() {
        let dispatcher =
            TaskDispatcher::from_config(&config, catalog, Arc::new(RateLimiter::in_memory()))?;
        let input = match cli::read_input(&request.input, &FileExtractor) {
            Ok(input) => input,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                return Ok(ExitCode::FAILURE);
            }
        };
        let status = cli::run_task(&dispatcher, &request, input, &mut stdout).await?;
        return Ok(status.exit_code());
    }

    // ── Mail loop ────────────────────────────────────────────────────
    let mail = config.mail()?.clone();
    let limiter = RateLimiter::open(config.app_settings.rate_limit_store.clone())?;
    let quota_store = limiter
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "in memory".to_string());
    let dispatcher = TaskDispatcher::from_config(&config, catalog, Arc::new(limiter))?;
    let sender = SmtpMailer::new(&mail, config.app_settings.send_retries)?
        .with_retry_delay(Duration::from_secs(config.app_settings.send_retry_delay));

    eprintln!("📬 taskmailer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} (IMAP {}:{})", mail.email_address, mail.imap_server, mail.imap_port);
    eprintln!("   SMTP: {}:{}", mail.smtp_server, mail.smtp_port);
    eprintln!("   Tasks: {}", dispatcher.catalog().subjects().join(", "));
    eprintln!("   Quota store: {quota_store}");
    eprintln!("   Polling every {}s. Ctrl-C to stop.\n", config.app_settings.check_interval);

    let mail_loop = MailLoop::new(
        Arc::new(ImapMailbox::new(mail.clone())),
        Arc::new(sender),
        Arc::new(dispatcher),
        &mail.email_address,
        Duration::from_secs(config.app_settings.check_interval),
    );
    let (mut handle, shutdown) = spawn_mail_loop(mail_loop);

    tokio::select! {
        result = &mut handle => {
            result.context("Mail loop stopped unexpectedly")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Ctrl-C received, stopping after the current message");
            let _ = shutdown.send(true);
            handle.await.context("Mail loop failed during shutdown")?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
