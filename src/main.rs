use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;

use kompressor::cli::{Cli, Commands};
use kompressor::core::{config, init_logger, log_pipeline_configuration, metrics};
use kompressor::pipeline::encoder::check_encoder;
use kompressor::pipeline::{Orchestrator, PipelineSettings};
use kompressor::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps, TelegramTransport};

/// Dispatcher restarts allowed after a panic before giving up
const MAX_DISPATCHER_RESTARTS: u32 = 5;

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, encoder check, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Log panics from spawned runs instead of losing them on stderr
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    // Load environment variables from .env if present (before any config is read)
    let _ = dotenv();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run { drop_pending }) => run_bot(drop_pending).await,
        Some(Commands::CheckEncoder) => run_check_encoder().await,
        None => {
            log::info!("No command specified, running bot in default mode");
            run_bot(false).await
        }
    }
}

async fn run_check_encoder() -> Result<()> {
    let version = check_encoder(&config::FFMPEG_BIN).await?;
    println!("{}", version);
    Ok(())
}

async fn run_bot(drop_pending: bool) -> Result<()> {
    log::info!("Starting kompressor v{}", env!("CARGO_PKG_VERSION"));

    match check_encoder(&config::FFMPEG_BIN).await {
        Ok(version) => log::info!("Encoder: {}", version),
        Err(e) => return Err(anyhow::anyhow!("ffmpeg is not usable: {}", e)),
    }

    tokio::fs::create_dir_all(config::TEMP_FILES_DIR.as_str()).await?;
    log_pipeline_configuration();

    let bot = create_bot()?;
    match bot.get_me().await {
        Ok(me) => log::info!("Logged in as @{}", me.username()),
        Err(e) => return Err(anyhow::anyhow!("Failed to reach the Bot API: {}", e)),
    }
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let transport = Arc::new(TelegramTransport::new(bot.clone())?);
    let orchestrator = Arc::new(Orchestrator::new(
        transport.clone(),
        transport,
        PipelineSettings::from_env(),
    ));
    let deps = HandlerDeps::new(orchestrator, *config::pipeline::MAX_CONCURRENT_JOBS);

    let mut restarts = 0;
    loop {
        let bot_clone = bot.clone();
        let handler = schema(deps.clone());

        let handle = tokio::spawn(async move {
            let mut builder = Polling::builder(bot_clone.clone());
            if drop_pending {
                builder = builder.drop_pending_updates();
            }
            let listener = builder.build();

            Dispatcher::builder(bot_clone, handler)
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() && restarts < MAX_DISPATCHER_RESTARTS => {
                restarts += 1;
                log::error!(
                    "Dispatcher panicked ({}/{}), restarting: {}",
                    restarts,
                    MAX_DISPATCHER_RESTARTS,
                    join_err
                );
                tokio::time::sleep(Duration::from_secs(u64::from(restarts) * 2)).await;
            }
            Err(join_err) => {
                return Err(anyhow::anyhow!("Dispatcher stopped: {}", join_err));
            }
        }
    }

    log::info!("Metrics at shutdown:\n{}", metrics::gather_text());
    Ok(())
}
