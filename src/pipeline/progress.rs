//! Progress events and the throttled status message renderer.

use crate::core::config;
use crate::core::utils::format_rate;
use crate::pipeline::request::{ChatRef, MessageRef};
use crate::pipeline::transport::Transport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Download,
    Encode,
}

/// One progress observation. `percent` is always within 0..=100.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub percent: u8,
    /// Download throughput in bytes per second, when known
    pub rate_bytes_per_sec: Option<f64>,
}

impl ProgressEvent {
    pub fn download(percent: u8, rate_bytes_per_sec: Option<f64>) -> Self {
        Self {
            stage: ProgressStage::Download,
            percent: percent.min(100),
            rate_bytes_per_sec,
        }
    }

    pub fn encode(percent: u8) -> Self {
        Self {
            stage: ProgressStage::Encode,
            percent: percent.min(100),
            rate_bytes_per_sec: None,
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Renders a `BAR_SEGMENTS`-wide bar, one filled segment per 5%.
pub fn progress_bar(percent: u8) -> String {
    let segments = config::progress::BAR_SEGMENTS;
    let filled = (usize::from(percent.min(100)) * segments / 100).min(segments);
    format!("{}{}", "█".repeat(filled), "░".repeat(segments - filled))
}

/// Status message text for an event.
pub fn render(event: &ProgressEvent) -> String {
    let bar = progress_bar(event.percent);
    match event.stage {
        ProgressStage::Download => {
            let mut text = format!("⬇️ Downloading... {}%\n{}", event.percent, bar);
            if let Some(rate) = event.rate_bytes_per_sec.filter(|r| *r > 0.0) {
                text.push_str(&format!("\n⚡ {}", format_rate(rate)));
            }
            text
        }
        ProgressStage::Encode => format!("⏳ Compressing... {}%\n{}", event.percent, bar),
    }
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Minimum time between two edits within the same stage
    pub min_interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_interval: config::progress::min_edit_interval(),
        }
    }
}

/// Turns progress events into edits of one status message.
///
/// Identical consecutive events are skipped, and edits are spaced by
/// `min_interval` except on a stage change or at 100%. Edit failures never
/// affect the run.
pub struct ProgressReporter {
    transport: Arc<dyn Transport>,
    chat: ChatRef,
    status: Option<MessageRef>,
    config: ReporterConfig,
    last: Option<(ProgressStage, u8)>,
    last_edit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(transport: Arc<dyn Transport>, chat: ChatRef, status: Option<MessageRef>, config: ReporterConfig) -> Self {
        Self {
            transport,
            chat,
            status,
            config,
            last: None,
            last_edit: None,
        }
    }

    fn should_render(&self, event: &ProgressEvent, now: Instant) -> bool {
        let stage_changed = match self.last {
            Some((stage, percent)) if stage == event.stage && percent == event.percent => return false,
            Some((stage, _)) => stage != event.stage,
            None => true,
        };

        if stage_changed || event.percent >= 100 {
            return true;
        }

        match self.last_edit {
            Some(at) => now.duration_since(at) >= self.config.min_interval,
            None => true,
        }
    }

    /// Handles one event. Returns `true` if the status message was edited.
    pub async fn report(&mut self, event: ProgressEvent) -> bool {
        let Some(status) = self.status else {
            log::debug!("{:?} progress {}% (no status message)", event.stage, event.percent);
            return false;
        };

        let now = Instant::now();
        if !self.should_render(&event, now) {
            return false;
        }

        self.last = Some((event.stage, event.percent));
        self.last_edit = Some(now);

        match self.transport.edit_text(self.chat, status, &render(&event)).await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Failed to update progress message: {}", e);
                false
            }
        }
    }

    /// Consumes events until every sender is dropped.
    pub async fn run(mut self, mut events: ProgressReceiver) {
        while let Some(event) = events.recv().await {
            self.report(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AppError, AppResult};
    use crate::pipeline::transport::OutgoingFile;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EditLog {
        edits: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for EditLog {
        async fn send_text(&self, _chat: ChatRef, _text: &str) -> AppResult<MessageRef> {
            Ok(MessageRef(1))
        }

        async fn edit_text(&self, _chat: ChatRef, _message: MessageRef, text: &str) -> AppResult<()> {
            if self.fail {
                return Err(AppError::Transport("message to edit not found".into()));
            }
            self.edits.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn delete_message(&self, _chat: ChatRef, _message: MessageRef) -> AppResult<()> {
            Ok(())
        }

        async fn send_file(&self, _chat: ChatRef, _file: OutgoingFile<'_>) -> AppResult<()> {
            Ok(())
        }
    }

    fn reporter(transport: Arc<EditLog>, min_interval: Duration) -> ProgressReporter {
        ProgressReporter::new(transport, ChatRef(1), Some(MessageRef(7)), ReporterConfig { min_interval })
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0), "░".repeat(20));
        assert_eq!(progress_bar(40), format!("{}{}", "█".repeat(8), "░".repeat(12)));
        assert_eq!(progress_bar(100), "█".repeat(20));
        assert_eq!(progress_bar(7), format!("{}{}", "█".repeat(1), "░".repeat(19)));
    }

    #[test]
    fn test_render_download_with_rate() {
        let text = render(&ProgressEvent::download(50, Some(2.0 * 1024.0 * 1024.0)));
        assert!(text.starts_with("⬇️ Downloading... 50%"));
        assert!(text.contains("2.00 MB/s"));
    }

    #[test]
    fn test_render_encode() {
        let text = render(&ProgressEvent::encode(60));
        assert_eq!(text, format!("⏳ Compressing... 60%\n{}{}", "█".repeat(12), "░".repeat(8)));
    }

    #[test]
    fn test_event_percent_clamped() {
        assert_eq!(ProgressEvent::encode(250).percent, 100);
    }

    #[tokio::test]
    async fn test_duplicate_events_skipped() {
        let log = Arc::new(EditLog::default());
        let mut reporter = reporter(log.clone(), Duration::ZERO);

        assert!(reporter.report(ProgressEvent::encode(20)).await);
        assert!(!reporter.report(ProgressEvent::encode(20)).await);
        assert_eq!(log.edits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_min_interval_throttles_but_not_stage_change_or_completion() {
        let log = Arc::new(EditLog::default());
        let mut reporter = reporter(log.clone(), Duration::from_secs(3600));

        assert!(reporter.report(ProgressEvent::download(10, None)).await);
        assert!(!reporter.report(ProgressEvent::download(20, None)).await);
        assert!(reporter.report(ProgressEvent::download(100, None)).await);
        assert!(reporter.report(ProgressEvent::encode(0)).await);
        assert!(!reporter.report(ProgressEvent::encode(40)).await);
        assert!(reporter.report(ProgressEvent::encode(100)).await);

        assert_eq!(log.edits.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_edit_failures_are_absorbed() {
        let log = Arc::new(EditLog {
            fail: true,
            ..Default::default()
        });
        let mut reporter = reporter(log, Duration::ZERO);
        assert!(!reporter.report(ProgressEvent::encode(50)).await);
    }

    #[tokio::test]
    async fn test_without_status_message_nothing_is_edited() {
        let log = Arc::new(EditLog::default());
        let mut reporter = ProgressReporter::new(log.clone(), ChatRef(1), None, ReporterConfig::default());
        assert!(!reporter.report(ProgressEvent::encode(50)).await);
        assert!(log.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let log = Arc::new(EditLog::default());
        let reporter = reporter(log.clone(), Duration::ZERO);
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(reporter.run(rx));
        for percent in [20, 40, 60] {
            tx.send(ProgressEvent::encode(percent)).unwrap();
        }
        drop(tx);
        task.await.unwrap();

        let edits = log.edits.lock().unwrap();
        assert_eq!(edits.len(), 3);
        assert!(edits[2].starts_with("⏳ Compressing... 60%"));
    }
}
