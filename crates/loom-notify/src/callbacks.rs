// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ordered, vetoable callback chains for events, breadcrumbs and sessions.
//!
//! Each category keeps its callbacks in registration order and never holds the
//! same `Arc` twice. Registries are copy-on-write: a run works on the list as
//! it was when the run began, so concurrent add/remove calls never affect it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use loom_notify_core::{Breadcrumb, Event, SessionPayload};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::NotifySdkError;
use crate::interceptor::suppress_reporting;

/// Runs before an event is delivered. Return `false` to drop the event.
pub type OnError = Arc<dyn Fn(&mut Event) -> bool + Send + Sync>;
/// Runs before a breadcrumb is recorded. Return `false` to drop it.
pub type OnBreadcrumb = Arc<dyn Fn(&mut Breadcrumb) -> bool + Send + Sync>;
/// Runs before a new session starts. Return `false` to prevent it.
pub type OnSession = Arc<dyn Fn(&mut SessionPayload) -> bool + Send + Sync>;

/// A callback of any category.
#[derive(Clone)]
pub enum Callback {
	Error(OnError),
	Breadcrumb(OnBreadcrumb),
	Session(OnSession),
}

/// Attempts at a non-blocking read before a crash-time run gives up.
const CRASH_READ_ATTEMPTS: usize = 64;

struct Listeners<T: ?Sized> {
	entries: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> Listeners<T> {
	fn new() -> Self {
		Self {
			entries: RwLock::new(Arc::new(Vec::new())),
		}
	}

	fn add(&self, callback: Arc<T>) -> bool {
		let mut entries = self.entries.write();
		if entries.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
			return false;
		}

		let mut next = Vec::with_capacity(entries.len() + 1);
		next.extend(entries.iter().cloned());
		next.push(callback);
		*entries = Arc::new(next);
		true
	}

	fn remove(&self, callback: &Arc<T>) -> bool {
		let mut entries = self.entries.write();
		if !entries.iter().any(|existing| Arc::ptr_eq(existing, callback)) {
			return false;
		}

		let next = entries
			.iter()
			.filter(|existing| !Arc::ptr_eq(existing, callback))
			.cloned()
			.collect();
		*entries = Arc::new(next);
		true
	}

	fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
		Arc::clone(&self.entries.read())
	}

	/// Never blocks: the crashing thread may be the one holding the write lock.
	fn try_snapshot(&self) -> Option<Arc<Vec<Arc<T>>>> {
		(0..CRASH_READ_ATTEMPTS).find_map(|_| {
			let snapshot = self.entries.try_read().map(|entries| Arc::clone(&entries));
			if snapshot.is_none() {
				std::hint::spin_loop();
			}
			snapshot
		})
	}

	fn len(&self) -> usize {
		self.entries.read().len()
	}
}

/// The three callback registries and the logic that runs them.
pub struct CallbackRegistry {
	on_error: Listeners<dyn Fn(&mut Event) -> bool + Send + Sync>,
	on_breadcrumb: Listeners<dyn Fn(&mut Breadcrumb) -> bool + Send + Sync>,
	on_session: Listeners<dyn Fn(&mut SessionPayload) -> bool + Send + Sync>,
}

impl CallbackRegistry {
	pub fn new() -> Self {
		Self {
			on_error: Listeners::new(),
			on_breadcrumb: Listeners::new(),
			on_session: Listeners::new(),
		}
	}

	/// Registers a callback. Returns `false` if it was already registered.
	pub fn add(&self, callback: Callback) -> bool {
		match callback {
			Callback::Error(cb) => self.on_error.add(cb),
			Callback::Breadcrumb(cb) => self.on_breadcrumb.add(cb),
			Callback::Session(cb) => self.on_session.add(cb),
		}
	}

	/// Removes a callback by identity. Returns `false` if it was not present.
	pub fn remove(&self, callback: &Callback) -> bool {
		match callback {
			Callback::Error(cb) => self.on_error.remove(cb),
			Callback::Breadcrumb(cb) => self.on_breadcrumb.remove(cb),
			Callback::Session(cb) => self.on_session.remove(cb),
		}
	}

	pub fn add_on_error(&self, callback: OnError) -> bool {
		self.on_error.add(callback)
	}

	pub fn remove_on_error(&self, callback: &OnError) -> bool {
		self.on_error.remove(callback)
	}

	pub fn add_on_breadcrumb(&self, callback: OnBreadcrumb) -> bool {
		self.on_breadcrumb.add(callback)
	}

	pub fn remove_on_breadcrumb(&self, callback: &OnBreadcrumb) -> bool {
		self.on_breadcrumb.remove(callback)
	}

	pub fn add_on_session(&self, callback: OnSession) -> bool {
		self.on_session.add(callback)
	}

	pub fn remove_on_session(&self, callback: &OnSession) -> bool {
		self.on_session.remove(callback)
	}

	pub fn error_callback_count(&self) -> usize {
		self.on_error.len()
	}

	pub fn breadcrumb_callback_count(&self) -> usize {
		self.on_breadcrumb.len()
	}

	pub fn session_callback_count(&self) -> usize {
		self.on_session.len()
	}

	/// Runs the error callbacks. Returns `false` if one of them vetoed.
	pub fn run_on_error(&self, event: &mut Event) -> bool {
		run_chain("error", &self.on_error.snapshot(), event)
	}

	/// Crash-time variant of [`run_on_error`](Self::run_on_error) that never
	/// blocks on the registry lock. If the registry cannot be read the event
	/// is let through.
	pub(crate) fn run_on_error_nonblocking(&self, event: &mut Event) -> bool {
		match self.on_error.try_snapshot() {
			Some(callbacks) => run_chain("error", &callbacks, event),
			None => {
				warn!("Error callbacks unavailable during crash, delivering without them");
				true
			}
		}
	}

	/// Runs the breadcrumb callbacks. Returns `false` if one of them vetoed.
	pub fn run_on_breadcrumb(&self, breadcrumb: &mut Breadcrumb) -> bool {
		run_chain("breadcrumb", &self.on_breadcrumb.snapshot(), breadcrumb)
	}

	/// Runs the session callbacks. Returns `false` if one of them vetoed.
	pub fn run_on_session(&self, session: &mut SessionPayload) -> bool {
		run_chain("session", &self.on_session.snapshot(), session)
	}
}

impl Default for CallbackRegistry {
	fn default() -> Self {
		Self::new()
	}
}

fn run_chain<F, S>(category: &'static str, callbacks: &[Arc<F>], subject: &mut S) -> bool
where
	F: Fn(&mut S) -> bool + ?Sized,
{
	for (index, callback) in callbacks.iter().enumerate() {
		// A panicking callback is not an unhandled failure of the host.
		let outcome =
			suppress_reporting(|| panic::catch_unwind(AssertUnwindSafe(|| callback(subject))));
		match outcome {
			Ok(true) => {}
			Ok(false) => {
				debug!(category, index, "Callback vetoed");
				return false;
			}
			Err(payload) => {
				let err = NotifySdkError::CallbackExecution {
					category,
					message: panic_message(payload.as_ref()),
				};
				warn!(error = %err, index, "Ignoring failed callback");
			}
		}
	}
	true
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}
