//! Notifier: two sinks for task-lifecycle events — desktop/OS notifications
//! and the SSE broadcast the Control Surface's `/events` route serves (spec
//! §4.7).
//!
//! The broadcast channel is the natural tokio-native stand-in for the
//! teacher's `EventBuffer` ring-buffer (`proxy/api/mod.rs`): subscribers come
//! and go, late subscribers just miss what fired before they connected —
//! there is no replay buffer here because the spec describes pure relay.

use chrono::Timelike;
use tokio::sync::broadcast;

use crate::store::settings;
use crate::store::types::{NudgeMode, Task};
use crate::store::Store;

/// Broadcast channel capacity. A lagging subscriber drops oldest events
/// first (tokio's standard broadcast backpressure); fine for a relay with no
/// replay guarantees.
const SSE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event")]
pub enum NotifyEvent {
    #[serde(rename = "task:complete")]
    Complete {
        task_id: i64,
        task_name: String,
        output_excerpt: String,
        duration_ms: i64,
    },
    #[serde(rename = "task:failed")]
    Failed {
        task_id: i64,
        task_name: String,
        error_message: String,
    },
}

const EXCERPT_CHARS: usize = 200;

pub struct Notifier {
    store: Store,
    sse_tx: broadcast::Sender<NotifyEvent>,
}

impl Notifier {
    pub fn new(store: Store) -> Self {
        let (sse_tx, _rx) = broadcast::channel(SSE_CHANNEL_CAPACITY);
        Self { store, sse_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotifyEvent> {
        self.sse_tx.subscribe()
    }

    /// Relay an externally-sourced event straight to SSE subscribers (the
    /// Control Surface's `POST /notify`), bypassing the nudge gate — that
    /// gate only applies to nudges this process originates itself.
    pub fn relay(&self, event: NotifyEvent) {
        let _ = self.sse_tx.send(event);
    }

    pub fn notify_success(&self, task: &Task, output: &str, duration_ms: i64) {
        let event = NotifyEvent::Complete {
            task_id: task.id,
            task_name: task.name.clone(),
            output_excerpt: truncate_chars(output, EXCERPT_CHARS),
            duration_ms,
        };
        let _ = self.sse_tx.send(event.clone());

        if self.should_nudge_on_success(task) {
            self.os_notify(&format!("{} completed", task.name), &excerpt_text(&event));
        }
    }

    pub fn notify_failure(&self, task: &Task, error_message: &str) {
        let event = NotifyEvent::Failed {
            task_id: task.id,
            task_name: task.name.clone(),
            error_message: error_message.to_string(),
        };
        let _ = self.sse_tx.send(event);

        if self.nudge_mode_for(task) != NudgeMode::Never {
            self.os_notify(&format!("{} failed", task.name), error_message);
        }
    }

    fn nudge_mode_for(&self, task: &Task) -> NudgeMode {
        if let Some(mode) = &task.nudge_mode {
            return NudgeMode::parse(mode);
        }
        self.store
            .get_setting(settings::DEFAULT_NUDGE_MODE)
            .ok()
            .flatten()
            .map(|v| NudgeMode::parse(&v))
            .unwrap_or(NudgeMode::Always)
    }

    fn should_nudge_on_success(&self, task: &Task) -> bool {
        match self.nudge_mode_for(task) {
            NudgeMode::Never | NudgeMode::FailureOnly => false,
            NudgeMode::Always => !self.in_quiet_hours(),
        }
    }

    fn notifications_enabled(&self) -> bool {
        self.store
            .get_setting_or(settings::NOTIFICATIONS_ENABLED, "true")
            .map(|v| v != "false")
            .unwrap_or(true)
    }

    /// `[from, until)` in local wall-clock, wrapping past midnight (e.g.
    /// 22:00 → 07:00). Unset or unparseable bounds mean "never quiet".
    fn in_quiet_hours(&self) -> bool {
        let (Some(from), Some(until)) = (
            self.store.get_setting(settings::QUIET_HOURS_FROM).ok().flatten().and_then(|v| parse_hhmm(&v)),
            self.store.get_setting(settings::QUIET_HOURS_UNTIL).ok().flatten().and_then(|v| parse_hhmm(&v)),
        ) else {
            return false;
        };

        let now = chrono::Local::now();
        let minutes_now = now.hour() * 60 + now.minute();
        if from <= until {
            minutes_now >= from && minutes_now < until
        } else {
            minutes_now >= from || minutes_now < until
        }
    }

    /// Best-effort; a missing `notify-send`/no display server must never
    /// fail the caller (spec §7 Memory/embedding/notify — non-fatal).
    fn os_notify(&self, summary: &str, body: &str) {
        if !self.notifications_enabled() {
            return;
        }
        if let Err(err) = notify_rust::Notification::new().summary(summary).body(body).show() {
            tracing::warn!(error = %err, "OS notification failed");
        }
    }
}

fn excerpt_text(event: &NotifyEvent) -> String {
    match event {
        NotifyEvent::Complete { output_excerpt, .. } => output_excerpt.clone(),
        NotifyEvent::Failed { error_message, .. } => error_message.clone(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Parse "HH:MM" into minutes-since-midnight.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h < 24 && m < 60 {
        Some(h * 60 + m)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        (store, dir)
    }

    fn seed_task(store: &Store, nudge_mode: Option<&str>) -> Task {
        let task = store
            .create_task("Digest", None, "Summarize", "claude", "manual", None, None, None, None, None, false, None)
            .unwrap();
        if let Some(mode) = nudge_mode {
            store
                .update_task(
                    task.id,
                    &crate::store::types::TaskPatch { nudge_mode: Some(mode.to_string()), ..Default::default() },
                )
                .unwrap();
        }
        store.get_task(task.id).unwrap().unwrap()
    }

    #[test]
    fn success_broadcasts_complete_event() {
        let (store, _dir) = test_store();
        let task = seed_task(&store, None);
        let notifier = Notifier::new(store);
        let mut rx = notifier.subscribe();

        notifier.notify_success(&task, "all good", 42);

        let event = rx.try_recv().unwrap();
        match event {
            NotifyEvent::Complete { task_id, duration_ms, .. } => {
                assert_eq!(task_id, task.id);
                assert_eq!(duration_ms, 42);
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn failure_always_broadcasts_even_with_never_nudge_mode() {
        let (store, _dir) = test_store();
        let task = seed_task(&store, Some("never"));
        let notifier = Notifier::new(store);
        let mut rx = notifier.subscribe();

        notifier.notify_failure(&task, "boom");

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, NotifyEvent::Failed { .. }));
    }

    #[test]
    fn failure_only_mode_suppresses_success_nudge_but_not_broadcast() {
        let (store, _dir) = test_store();
        let task = seed_task(&store, Some("failure_only"));
        let notifier = Notifier::new(store);
        assert!(!notifier.should_nudge_on_success(&task));
    }

    #[test]
    fn quiet_hours_wrap_past_midnight() {
        let (store, _dir) = test_store();
        store.set_setting(settings::QUIET_HOURS_FROM, "22:00").unwrap();
        store.set_setting(settings::QUIET_HOURS_UNTIL, "07:00").unwrap();
        let notifier = Notifier::new(store);
        // Can't control "now" deterministically without injecting a clock;
        // just exercise the parse path and confirm it doesn't panic.
        let _ = notifier.in_quiet_hours();
    }

    #[test]
    fn unset_quiet_hours_never_gates() {
        let (store, _dir) = test_store();
        let notifier = Notifier::new(store);
        assert!(!notifier.in_quiet_hours());
    }
}
