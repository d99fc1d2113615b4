use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use cathy::chatbot::kernel::{self, ProcessKernel};
use cathy::chatbot::platform::PlatformEvent;
use cathy::chatbot::telegram::dispatch_events;
use cathy::chatbot::{ChatbotConfig, ChatbotEngine, Database, Persona, TelegramClient};
use cathy::config::Config;

/// Inbound events buffered between the dispatcher and the engine.
const EVENT_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {e}");
        }
    }

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log dir {}: {e}", log_dir.display());
        return ExitCode::FAILURE;
    }
    let file_appender = tracing_appender::rolling::never(&log_dir, "cathy.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("Starting cathy {}", env!("CARGO_PKG_VERSION"));
    match &config.config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("Loaded config from environment"),
    }

    match run(config).await {
        Ok(()) => {
            info!("Bot finished running");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Startup failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize everything, then run until a termination signal.
async fn run(config: Config) -> anyhow::Result<()> {
    info!("Initializing database...");
    let database = Database::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    info!("Database initialized");

    info!("Initializing kernel...");
    let persona = Persona::builtin().with_overrides(&config.predicates);
    let mut process_kernel = ProcessKernel::start(&config.engine).context("starting rule engine")?;
    kernel::load(&mut process_kernel, &persona, &config.engine.startup_file)
        .await
        .context("loading rules")?;

    info!("Initializing Telegram bot...");
    let bot = Bot::new(&config.bot_token);
    let telegram = Arc::new(TelegramClient::new(bot.clone()));
    let identity = telegram.identity().await.context("connecting to Telegram")?;

    let engine = ChatbotEngine::new(
        ChatbotConfig { channel_id: config.channel_id },
        Box::new(process_kernel),
        Arc::new(database),
        telegram,
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    tx.send(PlatformEvent::Ready(identity))
        .await
        .context("queueing ready event")?;
    tokio::spawn(dispatch_events(bot, tx, shutdown.clone()));

    engine.run(rx, shutdown).await;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!("Signal received ({signal}), exiting");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
