//! Telegram bot handler tree configuration
//!
//! Commands and menu callbacks are answered inline. Media messages are turned into
//! [`MediaRequest`]s and each one runs as its own task, bounded by a semaphore so
//! only a few encoder processes exist at a time.

use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;
use tokio::sync::Semaphore;

use crate::core::metrics;
use crate::pipeline::{ChatRef, MediaKind, MediaRequest, MessageRef, Orchestrator};
use crate::telegram::bot::{callback_reply, help_text, start_keyboard, welcome_text, Command};

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: Arc<Semaphore>,
}

impl HandlerDeps {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent_jobs: usize) -> Self {
        Self {
            orchestrator,
            limiter: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }
}

/// Extracts a pipeline request from a message carrying media.
///
/// Returns `None` for text, photos, stickers and documents that are not video files.
pub fn media_request_from_message(msg: &Message) -> Option<MediaRequest> {
    let chat = ChatRef(msg.chat.id.0);

    let request = if let Some(video) = msg.video() {
        MediaRequest::new(
            MediaKind::Video,
            video.file.id.0.clone(),
            u64::from(video.file.size),
            video.file_name.clone(),
            chat,
        )
    } else if let Some(animation) = msg.animation() {
        MediaRequest::new(
            MediaKind::Animation,
            animation.file.id.0.clone(),
            u64::from(animation.file.size),
            animation.file_name.clone(),
            chat,
        )
    } else if let Some(document) = msg.document() {
        MediaRequest::new(
            MediaKind::Document,
            document.file.id.0.clone(),
            u64::from(document.file.size),
            document.file_name.clone(),
            chat,
        )
    } else if let Some(audio) = msg.audio() {
        MediaRequest::new(
            MediaKind::Audio,
            audio.file.id.0.clone(),
            u64::from(audio.file.size),
            audio.file_name.clone(),
            chat,
        )
    } else if let Some(voice) = msg.voice() {
        MediaRequest::new(
            MediaKind::Audio,
            voice.file.id.0.clone(),
            u64::from(voice.file.size),
            None,
            chat,
        )
    } else {
        None
    }?;

    Some(request.reply_to(MessageRef(msg.id.0)))
}

/// Creates the main dispatcher schema for the Telegram bot.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(command_handler())
        .branch(media_handler(deps))
        .branch(callback_handler())
}

fn command_handler() -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        |bot: Bot, msg: Message, cmd: Command| async move {
            match cmd {
                Command::Start => {
                    bot.send_message(msg.chat.id, welcome_text())
                        .reply_markup(start_keyboard())
                        .await?;
                }
                Command::Help => {
                    bot.send_message(msg.chat.id, help_text()).await?;
                }
            }
            Ok(())
        },
    ))
}

fn media_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter_map(|msg: Message| media_request_from_message(&msg))
        .endpoint(move |request: MediaRequest| {
            let deps = deps.clone();
            async move {
                spawn_run(&deps, request);
                Ok(())
            }
        })
}

/// Handler for the start menu buttons
fn callback_handler() -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(|bot: Bot, q: CallbackQuery| async move {
        bot.answer_callback_query(q.id.clone()).await?;

        let chat_id = q.message.as_ref().map(|m| m.chat().id);
        if let (Some(chat_id), Some(reply)) = (chat_id, q.data.as_deref().and_then(callback_reply)) {
            bot.send_message(chat_id, reply).await?;
        }
        Ok(())
    })
}

/// Starts the request on its own task; waits for a free slot before running.
fn spawn_run(deps: &HandlerDeps, request: MediaRequest) {
    let orchestrator = deps.orchestrator.clone();
    let limiter = deps.limiter.clone();

    log::info!(
        "📨 Accepted {} from chat {} ({} free slot(s))",
        request.kind().as_str(),
        request.chat().0,
        limiter.available_permits()
    );

    tokio::spawn(async move {
        let _permit = match limiter.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                log::error!("Job limiter closed: {}", e);
                metrics::record_run(request.kind().as_str(), false);
                return;
            }
        };

        let outcome = orchestrator.run(request).await;
        log::debug!("Run outcome: {:?}", outcome);
    });
}
