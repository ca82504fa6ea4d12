//! Aggregator driver: the single task that owns all session state.
//!
//! Raw events and control messages arrive over channels; the task sleeps
//! until the earliest tracker deadline and broadcasts whatever the trackers
//! emit. Nothing here is locked, because nothing here is shared.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant as TokioInstant};
use tracing::debug;

use treeline_accessibility::{
    CaptureFilter, RawUiEvent, RawUiEventKind, ScrollTracker, SessionEvent, StabilityTracker,
    TextTracker, TreeOracle, TreeWalker, DEFAULT_SCROLL_DEBOUNCE, DEFAULT_STABILITY_QUIESCENCE,
    DEFAULT_TEXT_INACTIVITY,
};

use crate::protocol;
use crate::server::Broadcaster;

/// Out-of-band instructions to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverControl {
    /// A client captured manually; drop any pending stability capture.
    ManualCapture,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub scroll_debounce: Duration,
    pub text_inactivity: Duration,
    pub stability_quiescence: Duration,
    /// Filter used for automatic stable-tree captures.
    pub capture_filter: CaptureFilter,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            scroll_debounce: DEFAULT_SCROLL_DEBOUNCE,
            text_inactivity: DEFAULT_TEXT_INACTIVITY,
            stability_quiescence: DEFAULT_STABILITY_QUIESCENCE,
            capture_filter: CaptureFilter {
                important_only: true,
                visible_only: false,
            },
        }
    }
}

/// Channel ends for feeding the driver. Dropping every `events` sender
/// stops the task.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    pub events: mpsc::UnboundedSender<RawUiEvent>,
    pub control: mpsc::UnboundedSender<DriverControl>,
}

pub fn spawn(
    oracle: Arc<dyn TreeOracle>,
    walker: TreeWalker,
    broadcaster: Broadcaster,
    config: DriverConfig,
) -> DriverHandle {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(oracle, walker, broadcaster, config, event_rx, control_rx));
    DriverHandle {
        events: event_tx,
        control: control_tx,
    }
}

async fn run(
    oracle: Arc<dyn TreeOracle>,
    walker: TreeWalker,
    broadcaster: Broadcaster,
    config: DriverConfig,
    mut event_rx: mpsc::UnboundedReceiver<RawUiEvent>,
    mut control_rx: mpsc::UnboundedReceiver<DriverControl>,
) {
    let mut scroll = ScrollTracker::new(config.scroll_debounce);
    let mut text = TextTracker::new(config.text_inactivity);
    let mut stability = StabilityTracker::new(config.stability_quiescence);
    let mut control_open = true;

    loop {
        let next_deadline = [scroll.deadline(), text.deadline(), stability.deadline()]
            .into_iter()
            .flatten()
            .min();

        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else { break };
                on_event(
                    event,
                    &mut scroll,
                    &mut text,
                    &mut stability,
                    &broadcaster,
                    oracle.as_ref(),
                    &walker,
                    &config.capture_filter,
                );
            }
            maybe_control = control_rx.recv(), if control_open => {
                match maybe_control {
                    Some(DriverControl::ManualCapture) => {
                        debug!("manual capture cancels pending stability deadline");
                        stability.cancel();
                    }
                    None => control_open = false,
                }
            }
            _ = sleep_until(TokioInstant::from_std(next_deadline.unwrap_or_else(Instant::now))),
                if next_deadline.is_some() =>
            {
                let now = Instant::now();
                if let Some(done) = scroll.on_deadline(now) {
                    broadcaster.broadcast(&protocol::accessibility_event(&done));
                }
                if let Some(done) = text.on_deadline(now) {
                    broadcaster.broadcast(&protocol::accessibility_event(&done));
                }
                if stability.on_deadline(now) {
                    let snapshot = walker.walk(&oracle.windows(), &config.capture_filter);
                    if let Some(changed) = stability.observe(snapshot) {
                        debug!(windows = changed.windows.len(), "screen settled, broadcasting");
                        broadcaster.broadcast(&protocol::stable_tree_message(&changed));
                    }
                }
            }
        }
    }
    debug!("event driver stopped");
}

#[allow(clippy::too_many_arguments)]
fn on_event(
    event: RawUiEvent,
    scroll: &mut ScrollTracker,
    text: &mut TextTracker,
    stability: &mut StabilityTracker,
    broadcaster: &Broadcaster,
    oracle: &dyn TreeOracle,
    walker: &TreeWalker,
    filter: &CaptureFilter,
) {
    let now = Instant::now();
    let source = event.source.as_ref();
    match &event.kind {
        RawUiEventKind::Scroll { delta_x, delta_y } => {
            if let Some(done) = scroll.on_scroll(source, *delta_x, *delta_y, event.epoch_ms, now) {
                broadcaster.broadcast(&protocol::accessibility_event(&done));
            }
        }
        RawUiEventKind::TextChanged {
            text: content,
            added_count,
            is_text_input,
        } => {
            if let Some(done) =
                text.on_text_changed(source, content, *added_count, *is_text_input, event.epoch_ms, now)
            {
                broadcaster.broadcast(&protocol::accessibility_event(&done));
            }
            if text.wants_context() {
                // Lazy, best effort: the session's context is whatever the
                // forest looks like at its first text change.
                text.attach_context(walker.walk(&oracle.windows(), filter));
            }
        }
        RawUiEventKind::Click { is_text_input } | RawUiEventKind::Focus { is_text_input } => {
            if let Some(done) = text.on_interaction(*is_text_input) {
                broadcaster.broadcast(&protocol::accessibility_event(&done));
            }
        }
        RawUiEventKind::ContentChanged | RawUiEventKind::WindowStateChanged => {
            stability.on_content_changed(now);
        }
        RawUiEventKind::Announcement { text: announcement } => {
            // Announcements pass straight through, no debounce.
            let trimmed = announcement.trim();
            if !trimmed.is_empty() {
                let event = SessionEvent::Announcement {
                    announcement: trimmed.to_string(),
                };
                broadcaster.broadcast(&protocol::accessibility_event(&event));
            }
        }
    }
}
