// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session tracking for stability metrics.
//!
//! At most one session is active at a time. Events capture a reference to the
//! active session and bump its counters atomically, so error capture never
//! waits on session transitions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loom_notify_core::{EventSession, SessionId, SessionPayload};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::callbacks::CallbackRegistry;

/// An active or paused session.
#[derive(Debug)]
pub struct Session {
	id: SessionId,
	started_at: DateTime<Utc>,
	handled: AtomicU32,
	unhandled: AtomicU32,
}

impl Session {
	fn new(id: SessionId, started_at: DateTime<Utc>) -> Self {
		Self {
			id,
			started_at,
			handled: AtomicU32::new(0),
			unhandled: AtomicU32::new(0),
		}
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	pub fn started_at(&self) -> DateTime<Utc> {
		self.started_at
	}

	pub fn handled_count(&self) -> u32 {
		self.handled.load(Ordering::Acquire)
	}

	pub fn unhandled_count(&self) -> u32 {
		self.unhandled.load(Ordering::Acquire)
	}

	/// Counts a handled error and returns the event's view of the session.
	pub fn record_handled(&self) -> EventSession {
		let handled = self.handled.fetch_add(1, Ordering::AcqRel) + 1;
		EventSession {
			id: self.id,
			started_at: self.started_at,
			handled_count: handled,
			unhandled_count: self.unhandled_count(),
		}
	}

	/// Counts an unhandled error and returns the event's view of the session.
	pub fn record_unhandled(&self) -> EventSession {
		let unhandled = self.unhandled.fetch_add(1, Ordering::AcqRel) + 1;
		EventSession {
			id: self.id,
			started_at: self.started_at,
			handled_count: self.handled_count(),
			unhandled_count: unhandled,
		}
	}

	/// The event's view of the session without counting anything.
	pub fn view(&self) -> EventSession {
		EventSession {
			id: self.id,
			started_at: self.started_at,
			handled_count: self.handled_count(),
			unhandled_count: self.unhandled_count(),
		}
	}

	/// Current counters as a payload.
	pub fn payload(&self) -> SessionPayload {
		SessionPayload {
			id: self.id,
			started_at: self.started_at,
			handled_count: self.handled_count(),
			unhandled_count: self.unhandled_count(),
			ended_at: None,
		}
	}
}

/// Tracks the session lifecycle: no session, or one active session.
pub struct SessionTracker {
	callbacks: Arc<CallbackRegistry>,
	active: RwLock<Option<Arc<Session>>>,
	last_stopped: Mutex<Option<Arc<Session>>>,
}

impl SessionTracker {
	pub fn new(callbacks: Arc<CallbackRegistry>) -> Self {
		Self {
			callbacks,
			active: RwLock::new(None),
			last_stopped: Mutex::new(None),
		}
	}

	/// Starts a new session, replacing any active one.
	///
	/// Session callbacks see the new session first; if one of them vetoes,
	/// nothing changes and `None` is returned.
	pub fn start(&self) -> Option<SessionId> {
		let id = SessionId::new();
		let mut payload = SessionPayload::starting(id);
		if !self.callbacks.run_on_session(&mut payload) {
			debug!(session_id = %id, "Session start vetoed");
			return None;
		}

		let session = Arc::new(Session::new(id, payload.started_at));
		// Both slots change under the `active` write guard.
		let mut active = self.active.write();
		*active = Some(session);
		*self.last_stopped.lock() = None;
		drop(active);
		debug!(session_id = %id, "Session started");
		Some(id)
	}

	/// Stops the active session, returning its final counters.
	pub fn stop(&self) -> Option<SessionPayload> {
		let mut active = self.active.write();
		let session = active.take()?;
		let mut payload = session.payload();
		payload.ended_at = Some(Utc::now());
		debug!(session_id = %session.id, "Session stopped");
		*self.last_stopped.lock() = Some(session);
		Some(payload)
	}

	/// Resumes the most recently stopped session with its id and counters.
	///
	/// Returns the active session's id unchanged if one is active, and `None`
	/// if there is nothing to resume.
	pub fn resume(&self) -> Option<SessionId> {
		let mut active = self.active.write();
		if let Some(session) = active.as_ref() {
			return Some(session.id);
		}

		let session = self.last_stopped.lock().take()?;
		let id = session.id;
		*active = Some(session);
		debug!(session_id = %id, "Session resumed");
		Some(id)
	}

	/// The active session, if any.
	pub fn current(&self) -> Option<Arc<Session>> {
		self.active.read().clone()
	}

	/// Like [`current`](Self::current) but never blocks; `None` if the state
	/// is being changed right now.
	pub(crate) fn try_current(&self) -> Option<Arc<Session>> {
		self.active.try_read().and_then(|active| active.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callbacks::OnSession;
	use std::thread;

	fn tracker() -> SessionTracker {
		SessionTracker::new(Arc::new(CallbackRegistry::new()))
	}

	#[test]
	fn starts_without_session() {
		let tracker = tracker();
		assert!(tracker.current().is_none());
		assert!(tracker.stop().is_none());
	}

	#[test]
	fn start_stop_resume_start() {
		let tracker = tracker();
		let a = tracker.start().unwrap();
		assert_eq!(tracker.current().unwrap().id(), a);

		let stopped = tracker.stop().unwrap();
		assert_eq!(stopped.id, a);
		assert!(stopped.ended_at.is_some());
		assert!(tracker.current().is_none());

		assert_eq!(tracker.resume(), Some(a));
		assert_eq!(tracker.current().unwrap().id(), a);

		tracker.stop();
		let b = tracker.start().unwrap();
		assert_ne!(a, b);
		assert_eq!(tracker.current().unwrap().id(), b);
	}

	#[test]
	fn resume_keeps_counters() {
		let tracker = tracker();
		tracker.start();
		tracker.current().unwrap().record_handled();
		tracker.current().unwrap().record_unhandled();
		tracker.stop();

		tracker.resume();
		let session = tracker.current().unwrap();
		assert_eq!(session.handled_count(), 1);
		assert_eq!(session.unhandled_count(), 1);
	}

	#[test]
	fn resume_without_prior_session_is_noop() {
		let tracker = tracker();
		assert_eq!(tracker.resume(), None);
		assert!(tracker.current().is_none());
	}

	#[test]
	fn resume_while_active_is_noop() {
		let tracker = tracker();
		let a = tracker.start().unwrap();
		assert_eq!(tracker.resume(), Some(a));
		assert_eq!(tracker.current().unwrap().id(), a);
	}

	#[test]
	fn start_after_stop_forgets_resumable_session() {
		let tracker = tracker();
		tracker.start();
		tracker.stop();
		let b = tracker.start().unwrap();
		tracker.stop();
		assert_eq!(tracker.resume(), Some(b));
	}

	#[test]
	fn vetoed_start_changes_nothing() {
		let callbacks = Arc::new(CallbackRegistry::new());
		let tracker = SessionTracker::new(callbacks.clone());
		let a = tracker.start().unwrap();

		let veto: OnSession = Arc::new(|_| false);
		callbacks.add_on_session(veto.clone());
		assert_eq!(tracker.start(), None);
		assert_eq!(tracker.current().unwrap().id(), a);

		callbacks.remove_on_session(&veto);
		assert!(tracker.start().is_some());
	}

	#[test]
	fn session_callbacks_see_fresh_payload() {
		let callbacks = Arc::new(CallbackRegistry::new());
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		callbacks.add_on_session(Arc::new(move |payload: &mut SessionPayload| {
			sink.lock().push(payload.clone());
			true
		}));
		let tracker = SessionTracker::new(callbacks);

		let id = tracker.start().unwrap();
		let seen = seen.lock();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].id, id);
		assert_eq!(seen[0].handled_count, 0);
		assert!(seen[0].ended_at.is_none());
	}

	#[test]
	fn record_returns_event_view() {
		let tracker = tracker();
		let id = tracker.start().unwrap();
		let session = tracker.current().unwrap();

		let first = session.record_handled();
		let second = session.record_unhandled();
		assert_eq!(first.id, id);
		assert_eq!((first.handled_count, first.unhandled_count), (1, 0));
		assert_eq!((second.handled_count, second.unhandled_count), (1, 1));
	}

	#[test]
	fn events_keep_their_session_across_transitions() {
		let tracker = tracker();
		let a = tracker.start().unwrap();
		let captured = tracker.current().unwrap();
		tracker.start();

		let view = captured.record_handled();
		assert_eq!(view.id, a);
		assert_eq!(tracker.current().unwrap().handled_count(), 0);
	}

	#[test]
	fn concurrent_recording_counts_every_event() {
		let tracker = Arc::new(tracker());
		tracker.start();

		let workers: Vec<_> = (0..8)
			.map(|_| {
				let tracker = Arc::clone(&tracker);
				thread::spawn(move || {
					for _ in 0..250 {
						if let Some(session) = tracker.current() {
							session.record_handled();
						}
					}
				})
			})
			.collect();
		for worker in workers {
			worker.join().unwrap();
		}

		assert_eq!(tracker.current().unwrap().handled_count(), 2000);
	}

	#[test]
	fn racing_start_and_stop_keep_a_resumable_session() {
		let tracker = Arc::new(tracker());

		let workers: Vec<_> = (0..4)
			.map(|i| {
				let tracker = Arc::clone(&tracker);
				thread::spawn(move || {
					for _ in 0..500 {
						if i % 2 == 0 {
							tracker.start();
						} else {
							tracker.stop();
						}
					}
				})
			})
			.collect();
		for worker in workers {
			worker.join().unwrap();
		}

		// Whichever call landed last, a stopped session is never lost.
		tracker.stop();
		assert!(tracker.resume().is_some());
		assert!(tracker.current().is_some());
	}

	#[test]
	fn view_does_not_count() {
		let tracker = tracker();
		tracker.start();
		let session = tracker.current().unwrap();
		session.record_handled();

		let view = session.view();
		assert_eq!((view.handled_count, view.unhandled_count), (1, 0));
		assert_eq!(session.handled_count(), 1);
	}

	#[test]
	fn try_current_reads_without_blocking() {
		let tracker = tracker();
		assert!(tracker.try_current().is_none());
		let id = tracker.start().unwrap();
		assert_eq!(tracker.try_current().unwrap().id(), id);

		let _held = tracker.active.write();
		assert!(tracker.try_current().is_none());
	}
}
