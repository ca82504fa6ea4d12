//! Debounced event aggregation.
//!
//! Three pure state machines collapse raw event bursts into session events.
//! None of them touch the clock: the caller passes `Instant`s in and polls
//! `deadline()` / `on_deadline()`, which keeps the timer semantics fully
//! testable with shifted instants and leaves exactly one pending deadline
//! per tracker at any time.

use std::time::{Duration, Instant};

use crate::events::{SessionEvent, SourceNode};
use crate::tree::Snapshot;

pub const DEFAULT_SCROLL_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_TEXT_INACTIVITY: Duration = Duration::from_secs(2);
pub const DEFAULT_STABILITY_QUIESCENCE: Duration = Duration::from_secs(1);

/// A text change that adds more than this many characters counts as a paste.
const PASTE_THRESHOLD: i32 = 10;

fn anchors_differ(current: &Option<SourceNode>, incoming: &Option<SourceNode>) -> bool {
    match (current, incoming) {
        (Some(a), Some(b)) => !a.same_anchor(b),
        (None, None) => false,
        _ => true,
    }
}

/// Collapses a burst of scroll events into one `SCROLL_SEQUENCE_END`.
#[derive(Debug)]
pub struct ScrollTracker {
    debounce: Duration,
    session: Option<ScrollSession>,
}

#[derive(Debug)]
struct ScrollSession {
    source: Option<SourceNode>,
    total_x: i32,
    total_y: i32,
    timestamps: Vec<i64>,
    deadline: Instant,
}

impl ScrollSession {
    fn finish(self) -> SessionEvent {
        SessionEvent::ScrollSequenceEnd {
            total_scroll_x: self.total_x,
            total_scroll_y: self.total_y,
            scroll_event_count: self.timestamps.len(),
            scroll_timestamps: self.timestamps,
            source: self.source,
        }
    }
}

impl ScrollTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            session: None,
        }
    }

    /// Feeds one raw scroll. Returns the finished previous session when the
    /// scroll anchor switched mid-stream.
    pub fn on_scroll(
        &mut self,
        source: Option<&SourceNode>,
        delta_x: i32,
        delta_y: i32,
        epoch_ms: i64,
        now: Instant,
    ) -> Option<SessionEvent> {
        let incoming = source.cloned();
        let mut finished = None;
        if let Some(session) = &self.session {
            if anchors_differ(&session.source, &incoming) {
                finished = self.session.take().map(ScrollSession::finish);
            }
        }

        match &mut self.session {
            Some(session) => {
                session.total_x += delta_x;
                session.total_y += delta_y;
                session.timestamps.push(epoch_ms);
                session.deadline = now + self.debounce;
            }
            None => {
                self.session = Some(ScrollSession {
                    source: incoming,
                    total_x: delta_x,
                    total_y: delta_y,
                    timestamps: vec![epoch_ms],
                    deadline: now + self.debounce,
                });
            }
        }
        finished
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.deadline)
    }

    /// Finalizes the session if its debounce window has elapsed.
    pub fn on_deadline(&mut self, now: Instant) -> Option<SessionEvent> {
        if self.session.as_ref().is_some_and(|s| now >= s.deadline) {
            self.session.take().map(ScrollSession::finish)
        } else {
            None
        }
    }
}

/// Collapses typing into one `TEXT_SEQUENCE_END` per field visit.
#[derive(Debug)]
pub struct TextTracker {
    inactivity: Duration,
    session: Option<TextSession>,
}

#[derive(Debug)]
struct TextSession {
    source: Option<SourceNode>,
    text: String,
    event_count: usize,
    paste_count: usize,
    started_epoch_ms: i64,
    last_epoch_ms: i64,
    deadline: Instant,
    tree_context: Option<Snapshot>,
}

impl TextSession {
    fn finish(self) -> SessionEvent {
        SessionEvent::TextSequenceEnd {
            session_text: self.text,
            text_event_count: self.event_count,
            paste_event_count: self.paste_count,
            contains_paste: self.paste_count > 0,
            session_duration_ms: self.last_epoch_ms - self.started_epoch_ms,
            text_field_source: self.source,
            tree_context: self.tree_context,
        }
    }
}

impl TextTracker {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            inactivity,
            session: None,
        }
    }

    /// Feeds one text change. Each change replaces the session text with the
    /// field's full current content. Changes on non-input nodes are ignored.
    /// Returns the finished previous session when the field switched.
    pub fn on_text_changed(
        &mut self,
        source: Option<&SourceNode>,
        text: &str,
        added_count: i32,
        is_text_input: bool,
        epoch_ms: i64,
        now: Instant,
    ) -> Option<SessionEvent> {
        if !is_text_input {
            return None;
        }
        let incoming = source.cloned();
        let mut finished = None;
        if let Some(session) = &self.session {
            if anchors_differ(&session.source, &incoming) {
                finished = self.session.take().map(TextSession::finish);
            }
        }

        match &mut self.session {
            Some(session) => {
                session.text = text.to_string();
                session.event_count += 1;
                if added_count > PASTE_THRESHOLD {
                    session.paste_count += 1;
                }
                session.last_epoch_ms = epoch_ms;
                session.deadline = now + self.inactivity;
            }
            None => {
                self.session = Some(TextSession {
                    source: incoming,
                    text: text.to_string(),
                    event_count: 1,
                    paste_count: if added_count > PASTE_THRESHOLD { 1 } else { 0 },
                    started_epoch_ms: epoch_ms,
                    last_epoch_ms: epoch_ms,
                    deadline: now + self.inactivity,
                    tree_context: None,
                });
            }
        }
        finished
    }

    /// True while a session is open and no tree context has been attached.
    /// The caller captures the context lazily; a failed capture just leaves
    /// the session without one.
    pub fn wants_context(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.tree_context.is_none())
    }

    /// Attaches the capture taken when the session opened. A session that
    /// already has a context keeps it.
    pub fn attach_context(&mut self, snapshot: Snapshot) {
        if let Some(session) = &mut self.session {
            if session.tree_context.is_none() {
                session.tree_context = Some(snapshot);
            }
        }
    }

    /// A click or focus somewhere that is not a text field ends the typing
    /// session immediately.
    pub fn on_interaction(&mut self, is_text_input: bool) -> Option<SessionEvent> {
        if is_text_input {
            return None;
        }
        self.session.take().map(TextSession::finish)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.deadline)
    }

    pub fn on_deadline(&mut self, now: Instant) -> Option<SessionEvent> {
        if self.session.as_ref().is_some_and(|s| now >= s.deadline) {
            self.session.take().map(TextSession::finish)
        } else {
            None
        }
    }
}

/// Watches content churn and decides when the screen has settled.
///
/// The tracker owns the deadline and the last stable snapshot; the caller
/// captures a fresh snapshot when the deadline fires and offers it through
/// [`observe`](StabilityTracker::observe).
#[derive(Debug)]
pub struct StabilityTracker {
    quiescence: Duration,
    deadline: Option<Instant>,
    stable: Option<Snapshot>,
}

impl StabilityTracker {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            deadline: None,
            stable: None,
        }
    }

    /// Any content change restarts the quiescence window.
    pub fn on_content_changed(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiescence);
    }

    /// A manual capture supersedes the pending stability check.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True when the quiescence window has elapsed; clears the deadline.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        if self.deadline.is_some_and(|d| now >= d) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Offers a fresh capture. Returns it for broadcast when it differs
    /// structurally from the last stable one (or is the first); an unchanged
    /// capture is swallowed.
    pub fn observe(&mut self, snapshot: Snapshot) -> Option<Snapshot> {
        let changed = match &self.stable {
            Some(stable) => !stable.same_structure(&snapshot),
            None => true,
        };
        if changed {
            self.stable = Some(snapshot.clone());
            Some(snapshot)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::EncoderConfig;
    use crate::events::SourceNode;
    use crate::oracle::{UiNode, UiWindow};
    use crate::tree::{CaptureFilter, KeepAllWindows, TreeWalker};

    fn source(node_id: i64) -> SourceNode {
        SourceNode::from_node(&UiNode::new(node_id), 1)
    }

    #[test]
    fn test_scroll_accumulates_and_fires_after_debounce() {
        let mut tracker = ScrollTracker::new(DEFAULT_SCROLL_DEBOUNCE);
        let t0 = Instant::now();
        let anchor = source(1);

        assert!(tracker.on_scroll(Some(&anchor), 10, 0, 1000, t0).is_none());
        assert!(tracker
            .on_scroll(Some(&anchor), 5, -3, 1100, t0 + Duration::from_millis(100))
            .is_none());

        // Deadline refreshed by the second event: not yet due at t0+300ms.
        assert!(tracker.on_deadline(t0 + Duration::from_millis(300)).is_none());

        let fired = tracker
            .on_deadline(t0 + Duration::from_millis(400))
            .expect("debounce elapsed");
        match fired {
            SessionEvent::ScrollSequenceEnd {
                total_scroll_x,
                total_scroll_y,
                scroll_event_count,
                scroll_timestamps,
                source,
            } => {
                assert_eq!(total_scroll_x, 15);
                assert_eq!(total_scroll_y, -3);
                assert_eq!(scroll_event_count, 2);
                assert_eq!(scroll_timestamps, vec![1000, 1100]);
                assert_eq!(source.unwrap().node_id, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(tracker.deadline().is_none());
    }

    #[test]
    fn test_scroll_anchor_switch_force_finalizes() {
        let mut tracker = ScrollTracker::new(DEFAULT_SCROLL_DEBOUNCE);
        let t0 = Instant::now();

        assert!(tracker.on_scroll(Some(&source(1)), 10, 0, 1000, t0).is_none());
        let finished = tracker
            .on_scroll(Some(&source(2)), 7, 0, 1050, t0 + Duration::from_millis(50))
            .expect("old session finalized");
        match finished {
            SessionEvent::ScrollSequenceEnd {
                total_scroll_x,
                source,
                ..
            } => {
                assert_eq!(total_scroll_x, 10);
                assert_eq!(source.unwrap().node_id, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The new session carries only the new anchor's deltas.
        let fired = tracker.on_deadline(t0 + Duration::from_secs(1)).unwrap();
        match fired {
            SessionEvent::ScrollSequenceEnd {
                total_scroll_x,
                source,
                ..
            } => {
                assert_eq!(total_scroll_x, 7);
                assert_eq!(source.unwrap().node_id, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_text_session_replaces_text_and_counts_pastes() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();
        let field = source(9);

        tracker.on_text_changed(Some(&field), "h", 1, true, 1000, t0);
        tracker.on_text_changed(
            Some(&field),
            "he",
            1,
            true,
            1200,
            t0 + Duration::from_millis(200),
        );
        tracker.on_text_changed(
            Some(&field),
            "hello pasted text!",
            16,
            true,
            1500,
            t0 + Duration::from_millis(500),
        );

        let fired = tracker
            .on_deadline(t0 + Duration::from_millis(2500))
            .expect("inactivity elapsed");
        match fired {
            SessionEvent::TextSequenceEnd {
                session_text,
                text_event_count,
                paste_event_count,
                contains_paste,
                session_duration_ms,
                text_field_source,
                tree_context,
            } => {
                assert_eq!(session_text, "hello pasted text!");
                assert_eq!(text_event_count, 3);
                assert_eq!(paste_event_count, 1);
                assert!(contains_paste);
                assert_eq!(session_duration_ms, 500);
                assert_eq!(text_field_source.unwrap().node_id, 9);
                // Nothing was attached in this run.
                assert!(tree_context.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_text_exactly_threshold_is_not_a_paste() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();
        tracker.on_text_changed(Some(&source(9)), "0123456789", 10, true, 1000, t0);
        let fired = tracker.on_deadline(t0 + Duration::from_secs(3)).unwrap();
        match fired {
            SessionEvent::TextSequenceEnd { contains_paste, .. } => assert!(!contains_paste),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_text_field_switch_finalizes_then_reopens() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();

        tracker.on_text_changed(Some(&source(1)), "abc", 3, true, 1000, t0);
        let finished = tracker
            .on_text_changed(Some(&source(2)), "x", 1, true, 1100, t0)
            .expect("previous field session finalized");
        match finished {
            SessionEvent::TextSequenceEnd { session_text, .. } => assert_eq!(session_text, "abc"),
            other => panic!("unexpected event: {other:?}"),
        }
        // New session is live for the second field.
        assert!(tracker.deadline().is_some());
    }

    #[test]
    fn test_non_input_interaction_ends_text_session() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();
        tracker.on_text_changed(Some(&source(1)), "abc", 3, true, 1000, t0);

        // Clicking another text field does not end the session.
        assert!(tracker.on_interaction(true).is_none());
        let finished = tracker.on_interaction(false).expect("session ended");
        match finished {
            SessionEvent::TextSequenceEnd { session_text, .. } => assert_eq!(session_text, "abc"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(tracker.deadline().is_none());
    }

    #[test]
    fn test_text_context_attaches_once_per_session() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();
        assert!(!tracker.wants_context());

        tracker.on_text_changed(Some(&source(1)), "a", 1, true, 1000, t0);
        assert!(tracker.wants_context());
        tracker.attach_context(snapshot_of("first", 100));
        assert!(!tracker.wants_context());
        // A later attach does not replace the session's context.
        tracker.attach_context(snapshot_of("second", 200));

        let fired = tracker.on_deadline(t0 + Duration::from_secs(3)).unwrap();
        match fired {
            SessionEvent::TextSequenceEnd { tree_context, .. } => {
                let context = tree_context.expect("context attached at open");
                let text = &context.windows[0].record.children[0].metadata.text;
                assert_eq!(text.as_deref(), Some("first"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!tracker.wants_context());
    }

    #[test]
    fn test_non_input_text_changes_are_ignored() {
        let mut tracker = TextTracker::new(DEFAULT_TEXT_INACTIVITY);
        let t0 = Instant::now();
        assert!(tracker
            .on_text_changed(Some(&source(1)), "toast", 5, false, 1000, t0)
            .is_none());
        assert!(tracker.deadline().is_none());
    }

    fn snapshot_of(text: &str, base_id: i64) -> Snapshot {
        let mut window = UiWindow::new(1, Some("Main".to_string()));
        let root = window.push_node(UiNode::new(base_id));
        let mut child = UiNode::new(base_id + 1);
        child.class_name = Some("android.widget.TextView".to_string());
        child.text = Some(text.to_string());
        let child_index = window.push_node(child);
        window.set_root(root);
        window.add_child(root, child_index);

        let walker = TreeWalker::new(EncoderConfig::default(), Box::new(KeepAllWindows));
        walker.walk(&[window], &CaptureFilter::default())
    }

    #[test]
    fn test_stability_restart_and_fire() {
        let mut tracker = StabilityTracker::new(DEFAULT_STABILITY_QUIESCENCE);
        let t0 = Instant::now();

        tracker.on_content_changed(t0);
        tracker.on_content_changed(t0 + Duration::from_millis(800));
        // First window restarted: not due at the original deadline.
        assert!(!tracker.on_deadline(t0 + Duration::from_millis(1000)));
        assert!(tracker.on_deadline(t0 + Duration::from_millis(1900)));
        // Deadline is one-shot.
        assert!(!tracker.on_deadline(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_stability_cancel_on_manual_capture() {
        let mut tracker = StabilityTracker::new(DEFAULT_STABILITY_QUIESCENCE);
        let t0 = Instant::now();
        tracker.on_content_changed(t0);
        tracker.cancel();
        assert!(tracker.deadline().is_none());
        assert!(!tracker.on_deadline(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_stability_broadcasts_only_structural_change() {
        let mut tracker = StabilityTracker::new(DEFAULT_STABILITY_QUIESCENCE);

        // First capture always broadcasts.
        assert!(tracker.observe(snapshot_of("hello", 100)).is_some());
        // Identical content under fresh volatile ids is swallowed.
        assert!(tracker.observe(snapshot_of("hello", 200)).is_none());
        // Real change broadcasts again.
        assert!(tracker.observe(snapshot_of("goodbye", 300)).is_some());
        assert!(tracker.observe(snapshot_of("goodbye", 400)).is_none());
    }
}
