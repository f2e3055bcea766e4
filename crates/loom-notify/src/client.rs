// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notifier client: captures errors and sessions and hands them to delivery.

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_notify_core::{
	AppInfo, Breadcrumb, BreadcrumbType, DeviceInfo, ErrorInfo, Event, Metadata, PayloadKind,
	SessionId, SessionPayload, SeverityReason, ThreadInfo, User,
};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::backtrace::stacktrace_from;
use crate::breadcrumbs::BreadcrumbState;
use crate::config::Configuration;
use crate::delivery::{delivery_params, DeliveryStatus};
use crate::device;
use crate::error::{NotifySdkError, Result};
use crate::interceptor::{FailureReporter, Interceptor, UnhandledFailure};
use crate::queue::{DeliveryHandle, DeliveryQueue, RetryPolicy};
use crate::session::{Session, SessionTracker};
use crate::snapshot::ConfigSnapshot;
use crate::store::PayloadStore;

/// Error class used for panics.
pub const PANIC_ERROR_CLASS: &str = "panic";

/// How long [`Client::shutdown`] waits by default for queued deliveries.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shared client state, also the interceptor's [`FailureReporter`].
struct ClientInner {
	snapshot: Arc<ConfigSnapshot>,
	sessions: SessionTracker,
	breadcrumbs: BreadcrumbState,
	metadata: RwLock<Metadata>,
	user: RwLock<Option<User>>,
	context: RwLock<Option<String>>,
	device: DeviceInfo,
	store: Option<Arc<PayloadStore>>,
	queue: DeliveryQueue,
	started: Instant,
	launch_completed: AtomicBool,
	closed: AtomicBool,
}

impl ClientInner {
	fn is_launching(&self) -> bool {
		if self.launch_completed.load(Ordering::Acquire) {
			return false;
		}
		// A zero threshold means the launch only ends when marked complete.
		let threshold = self.snapshot.launch_crash_threshold_ms();
		threshold == 0 || (self.started.elapsed().as_millis() as u64) < threshold
	}

	fn app_info(&self) -> AppInfo {
		let snapshot = &self.snapshot;
		AppInfo {
			version: snapshot.app_version().map(str::to_string),
			version_code: snapshot.version_code(),
			build_uuid: snapshot.build_uuid().map(str::to_string),
			code_bundle_id: snapshot.code_bundle_id().map(str::to_string),
			release_stage: snapshot.release_stage().map(str::to_string),
			app_type: snapshot.app_type().to_string(),
			duration_ms: self.started.elapsed().as_millis() as u64,
			is_launching: self.is_launching(),
		}
	}

	/// Whether events may be reported at all under the current settings.
	fn accepts(&self, error_class: &str) -> bool {
		if !self.snapshot.should_notify_for_release_stage() {
			if self.snapshot.logging_enabled() {
				debug!(
					release_stage = ?self.snapshot.release_stage(),
					"Release stage not enabled, dropping event"
				);
			}
			return false;
		}
		if self.snapshot.should_ignore_class(error_class) {
			if self.snapshot.logging_enabled() {
				debug!(error_class, "Ignoring error class");
			}
			return false;
		}
		true
	}

	/// Builds an event together with the session it is charged to.
	fn handled_event(
		&self,
		error: ErrorInfo,
		reason: SeverityReason,
	) -> (Event, Option<Arc<Session>>) {
		let mut event = Event::new(error, reason);
		if self.snapshot.send_threads() {
			event.thread = Some(ThreadInfo::current(false));
		}
		event.breadcrumbs = self.breadcrumbs.snapshot();
		event.metadata = self.metadata.read().clone();
		event.context = self
			.context
			.read()
			.clone()
			.or_else(|| self.snapshot.context().map(str::to_string));
		event.user = self.user.read().clone();
		event.app = self.app_info();
		event.device = device::stamp(&self.device);

		let session = self.sessions.current();
		event.session = session.as_ref().map(|session| session.view());
		(event, session)
	}

	/// Crash-time variant of [`handled_event`](Self::handled_event): never
	/// blocks, falling back to build-time values when state is locked.
	fn unhandled_event(&self, failure: &UnhandledFailure) -> (Event, Option<Arc<Session>>) {
		let error = ErrorInfo {
			error_class: PANIC_ERROR_CLASS.to_string(),
			message: failure.message.clone(),
			stacktrace: stacktrace_from(&failure.backtrace, &self.snapshot),
		};
		let mut event = Event::new(error, SeverityReason::UnhandledPanic);
		if self.snapshot.send_threads() {
			event.thread = Some(failure.thread.clone());
		}
		event.breadcrumbs = self.breadcrumbs.try_snapshot();
		event.metadata = self
			.metadata
			.try_read()
			.map(|metadata| metadata.clone())
			.unwrap_or_else(|| self.snapshot.metadata().clone());
		if let Some(location) = &failure.location {
			event.metadata.add("panic", "location", json!(location));
		}
		event.context = self
			.context
			.try_read()
			.and_then(|context| context.clone())
			.or_else(|| self.snapshot.context().map(str::to_string));
		event.user = self.user.try_read().and_then(|user| user.clone());
		event.app = self.app_info();
		event.device = device::stamp(&self.device);

		let session = self.sessions.try_current();
		event.session = session.as_ref().map(|session| session.view());
		(event, session)
	}

	/// Redacts and serializes an event that passed the pipeline.
	fn encode(&self, event: &mut Event) -> Result<Vec<u8>> {
		event.metadata = event.metadata.redacted_with(self.snapshot.redact_keys());
		Ok(serde_json::to_vec(event)?)
	}

	/// Queues an encoded event, persisting it if delivery ultimately fails.
	fn enqueue_event(&self, event_id: String, body: Vec<u8>) -> DeliveryHandle {
		let params = delivery_params(&self.snapshot, PayloadKind::Error);
		let Some(store) = &self.store else {
			return self.queue.enqueue(body, params);
		};
		let store = Arc::clone(store);
		let logging_enabled = self.snapshot.logging_enabled();
		self.queue.enqueue_with_completion(
			body,
			params,
			Box::new(move |body: &[u8], result: &Result<()>| {
				if should_persist(result) {
					persist(&store, &event_id, body, logging_enabled);
				}
			}),
		)
	}

	/// Queues every stored payload. Each file is removed once the server
	/// has answered for it; transient failures leave it for the next start.
	fn flush_stored(&self) -> usize {
		let Some(store) = &self.store else {
			return 0;
		};
		let pending = match store.pending() {
			Ok(pending) => pending,
			Err(e) => {
				warn!(error = %e, "Failed to list stored events");
				return 0;
			}
		};

		let mut queued = 0;
		for path in pending {
			let body = match store.read(&path) {
				Ok(body) => body,
				Err(e) => {
					warn!(error = %e, "Failed to read stored event");
					continue;
				}
			};
			let store = Arc::clone(store);
			let on_complete = Box::new(move |_: &[u8], result: &Result<()>| {
				if should_persist(result) {
					return;
				}
				if let Err(e) = store.remove(&path) {
					warn!(error = %e, "Failed to remove sent event");
				}
			});
			drop(self.queue.enqueue_with_completion(
				body,
				delivery_params(&self.snapshot, PayloadKind::Error),
				on_complete,
			));
			queued += 1;
		}
		if queued > 0 && self.snapshot.logging_enabled() {
			info!(count = queued, "Queued stored events");
		}
		queued
	}

	fn flush_session(&self, payload: &SessionPayload) -> DeliveryHandle {
		match serde_json::to_vec(payload) {
			Ok(body) => self
				.queue
				.enqueue(body, delivery_params(&self.snapshot, PayloadKind::Session)),
			Err(e) => {
				warn!(error = %e, "Failed to serialize session");
				DeliveryHandle::failed(e.into())
			}
		}
	}
}

impl FailureReporter for ClientInner {
	fn report_unhandled(&self, failure: &UnhandledFailure) {
		if self.closed.load(Ordering::Acquire) || !self.accepts(PANIC_ERROR_CLASS) {
			return;
		}

		let (mut event, session) = self.unhandled_event(failure);
		if !self.snapshot.callbacks().run_on_error_nonblocking(&mut event) {
			if self.snapshot.logging_enabled() {
				info!(event_id = %event.id, "Unhandled event vetoed by callback");
			}
			return;
		}
		charge_session(&mut event, session.as_deref());

		let body = match self.encode(&mut event) {
			Ok(body) => body,
			Err(e) => {
				warn!(error = %e, "Failed to encode unhandled event");
				return;
			}
		};
		let params = delivery_params(&self.snapshot, PayloadKind::Error);
		match self.snapshot.delivery().deliver(&body, &params) {
			DeliveryStatus::Delivered => {
				if self.snapshot.logging_enabled() {
					info!(event_id = %event.id, "Unhandled event delivered");
				}
			}
			status => {
				warn!(event_id = %event.id, ?status, "Failed to deliver unhandled event");
				if let (DeliveryStatus::Failed, Some(store)) = (status, &self.store) {
					persist(store, &event.id.to_string(), &body, self.snapshot.logging_enabled());
				}
			}
		}
	}
}

/// Keeps an event body that could not be delivered for the next start.
fn persist(store: &PayloadStore, event_id: &str, body: &[u8], logging_enabled: bool) {
	match store.write(event_id, body) {
		Ok(Some(path)) => {
			if logging_enabled {
				info!(event_id, path = %path.display(), "Persisted undelivered event");
			}
		}
		Ok(None) => {}
		Err(e) => warn!(event_id, error = %e, "Failed to persist undelivered event"),
	}
}

/// Transient failures and cancellation keep a payload for a later attempt. A
/// payload the server rejected is dropped.
fn should_persist(result: &Result<()>) -> bool {
	matches!(
		result,
		Err(NotifySdkError::Cancelled)
			| Err(NotifySdkError::Delivery {
				status: DeliveryStatus::Failed
			})
	)
}

/// Counts `event` against the session captured with it, after callbacks
/// have had their say on `unhandled`.
fn charge_session(event: &mut Event, session: Option<&Session>) {
	if let Some(session) = session {
		event.session = Some(if event.unhandled {
			session.record_unhandled()
		} else {
			session.record_handled()
		});
	}
}

/// The notifier.
///
/// Freezes the configuration, installs the panic interceptor (unless
/// `auto_detect_errors` is off) and starts a session (unless
/// `auto_track_sessions` is off). Handled errors are delivered in the
/// background; panics are delivered synchronously on the panicking thread.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use loom_notify::{Client, Configuration, HttpDelivery, DEFAULT_SHUTDOWN_GRACE};
///
/// let mut config = Configuration::new("your-api-key");
/// config.release_stage = Some("production".into());
/// config.set_delivery(Arc::new(HttpDelivery::new()));
///
/// let client = Client::start(&config)?;
/// client.leave_breadcrumb("Loaded settings");
///
/// if let Err(e) = do_something() {
///     client.notify(&e).wait()?;
/// }
///
/// client.shutdown(DEFAULT_SHUTDOWN_GRACE);
/// ```
#[derive(Clone)]
pub struct Client {
	inner: Arc<ClientInner>,
	interceptor: Arc<Interceptor>,
}

impl Client {
	/// Starts a client with the default retry policy.
	pub fn start(config: &Configuration) -> Result<Self> {
		Self::start_with_retry(config, RetryPolicy::default())
	}

	/// Starts a client whose background deliveries use `retry`.
	pub fn start_with_retry(config: &Configuration, retry: RetryPolicy) -> Result<Self> {
		let snapshot = ConfigSnapshot::build(config)?;
		let queue = DeliveryQueue::start(Arc::clone(snapshot.delivery()), retry)?;
		let store = snapshot.persistence_directory().and_then(|dir| {
			PayloadStore::open(dir, snapshot.max_persisted_events())
				.map(Arc::new)
				.map_err(|e| warn!(error = %e, "Event persistence disabled"))
				.ok()
		});

		let inner = Arc::new(ClientInner {
			sessions: SessionTracker::new(Arc::clone(snapshot.callbacks())),
			breadcrumbs: BreadcrumbState::new(Arc::clone(&snapshot)),
			metadata: RwLock::new(snapshot.metadata().clone()),
			user: RwLock::new(None),
			context: RwLock::new(None),
			device: device::detect(),
			store,
			queue,
			started: Instant::now(),
			launch_completed: AtomicBool::new(false),
			closed: AtomicBool::new(false),
			snapshot,
		});
		let reporter: Arc<dyn FailureReporter> = inner.clone();
		let client = Self {
			interceptor: Arc::new(Interceptor::new(reporter)),
			inner,
		};

		let snapshot = &client.inner.snapshot;
		if snapshot.auto_detect_errors() {
			client.interceptor.install();
		}
		if snapshot.auto_track_sessions() {
			client.start_session();
		}
		client.inner.flush_stored();
		if snapshot.logging_enabled() {
			info!(
				release_stage = ?snapshot.release_stage(),
				notify_endpoint = %snapshot.endpoints().notify,
				"Notifier client started"
			);
		}
		Ok(client)
	}

	/// The frozen configuration.
	pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
		&self.inner.snapshot
	}

	/// The panic interceptor owned by this client.
	pub fn interceptor(&self) -> &Interceptor {
		&self.interceptor
	}

	/// Reports a handled error in the background.
	pub fn notify<E>(&self, error: &E) -> DeliveryHandle
	where
		E: std::error::Error + ?Sized,
	{
		self.notify_with(error, |_| true)
	}

	/// Like [`notify`](Self::notify), with a callback for this event only.
	/// It runs after the registered error callbacks.
	pub fn notify_with<E>(
		&self,
		error: &E,
		on_error: impl FnOnce(&mut Event) -> bool,
	) -> DeliveryHandle
	where
		E: std::error::Error + ?Sized,
	{
		let error = ErrorInfo {
			error_class: std::any::type_name::<E>().to_string(),
			message: error.to_string(),
			stacktrace: stacktrace_from(&Backtrace::force_capture(), &self.inner.snapshot),
		};
		self.notify_event(error, SeverityReason::HandledError, on_error)
	}

	/// Reports a message that is not backed by an error value.
	pub fn notify_message(&self, name: &str, message: &str) -> DeliveryHandle {
		let error = ErrorInfo {
			error_class: name.to_string(),
			message: message.to_string(),
			stacktrace: stacktrace_from(&Backtrace::force_capture(), &self.inner.snapshot),
		};
		self.notify_event(error, SeverityReason::HandledMessage, |_| true)
	}

	/// Reports a handled error and waits for delivery to finish.
	///
	/// Must not be called from async code; await [`notify`](Self::notify)
	/// there instead.
	pub fn notify_blocking<E>(&self, error: &E) -> Result<()>
	where
		E: std::error::Error + ?Sized,
	{
		self.notify(error).wait()
	}

	fn notify_event(
		&self,
		error: ErrorInfo,
		reason: SeverityReason,
		on_error: impl FnOnce(&mut Event) -> bool,
	) -> DeliveryHandle {
		let inner = &self.inner;
		if inner.closed.load(Ordering::Acquire) {
			return DeliveryHandle::failed(NotifySdkError::ClientShutdown);
		}
		if !inner.accepts(&error.error_class) {
			return DeliveryHandle::skipped();
		}

		let (mut event, session) = inner.handled_event(error, reason);
		if !inner.snapshot.callbacks().run_on_error(&mut event) || !on_error(&mut event) {
			if inner.snapshot.logging_enabled() {
				info!(event_id = %event.id, "Event vetoed by callback");
			}
			return DeliveryHandle::skipped();
		}
		charge_session(&mut event, session.as_deref());

		inner.breadcrumbs.leave_automatic(
			Breadcrumb::new(BreadcrumbType::Error, event.error_class())
				.with_metadata("message", json!(event.error.message))
				.with_metadata("unhandled", json!(event.unhandled))
				.with_metadata("severity", json!(event.severity.to_string())),
		);

		match inner.encode(&mut event) {
			Ok(body) => {
				if inner.snapshot.logging_enabled() {
					debug!(event_id = %event.id, error_class = %event.error_class(), "Queueing event");
				}
				inner.enqueue_event(event.id.to_string(), body)
			}
			Err(e) => {
				warn!(event_id = %event.id, error = %e, "Failed to encode event");
				DeliveryHandle::failed(e)
			}
		}
	}

	/// Leaves a manual breadcrumb.
	pub fn leave_breadcrumb(&self, message: impl Into<String>) -> bool {
		self.inner.breadcrumbs.leave(Breadcrumb::manual(message))
	}

	/// Leaves a breadcrumb of any type, with metadata.
	pub fn leave_breadcrumb_with(
		&self,
		breadcrumb_type: BreadcrumbType,
		message: impl Into<String>,
		metadata: serde_json::Map<String, serde_json::Value>,
	) -> bool {
		let mut breadcrumb = Breadcrumb::new(breadcrumb_type, message);
		breadcrumb.metadata = metadata;
		self.inner.breadcrumbs.leave(breadcrumb)
	}

	/// Oldest-first copy of the recorded breadcrumbs.
	pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
		self.inner.breadcrumbs.snapshot()
	}

	/// Starts a new session. Returns `None` when vetoed by a session callback
	/// or when the release stage is not enabled.
	pub fn start_session(&self) -> Option<SessionId> {
		if !self.inner.snapshot.should_notify_for_release_stage() {
			return None;
		}
		let id = self.inner.sessions.start()?;
		if self.inner.snapshot.logging_enabled() {
			info!(session_id = %id, "Session started");
		}
		Some(id)
	}

	/// Stops the active session and flushes its counters to the sessions
	/// endpoint. Returns `None` if there was no active session.
	pub fn stop_session(&self) -> Option<DeliveryHandle> {
		let payload = self.inner.sessions.stop()?;
		if self.inner.snapshot.logging_enabled() {
			info!(
				session_id = %payload.id,
				handled = payload.handled_count,
				unhandled = payload.unhandled_count,
				"Session stopped"
			);
		}
		Some(self.inner.flush_session(&payload))
	}

	/// Resumes the last stopped session, or starts a new one if there is
	/// nothing to resume.
	pub fn resume_session(&self) -> Option<SessionId> {
		self.inner
			.sessions
			.resume()
			.or_else(|| self.start_session())
	}

	pub fn current_session(&self) -> Option<SessionId> {
		self.inner.sessions.current().map(|session| session.id())
	}

	pub fn add_metadata(&self, section: &str, key: impl Into<String>, value: serde_json::Value) {
		self.inner.metadata.write().add(section, key, value);
	}

	pub fn clear_metadata(&self, section: &str, key: &str) {
		self.inner.metadata.write().clear(section, key);
	}

	pub fn clear_metadata_section(&self, section: &str) {
		self.inner.metadata.write().clear_section(section);
	}

	pub fn get_metadata(&self, section: &str, key: &str) -> Option<serde_json::Value> {
		self.inner.metadata.read().get(section, key).cloned()
	}

	pub fn set_user(&self, user: User) {
		*self.inner.user.write() = Some(user);
	}

	pub fn clear_user(&self) {
		*self.inner.user.write() = None;
	}

	pub fn user(&self) -> Option<User> {
		self.inner.user.read().clone()
	}

	/// Overrides the configured context for subsequent events.
	pub fn set_context(&self, context: Option<String>) {
		*self.inner.context.write() = context;
	}

	pub fn context(&self) -> Option<String> {
		self.inner
			.context
			.read()
			.clone()
			.or_else(|| self.inner.snapshot.context().map(str::to_string))
	}

	/// Ends the launch period early; later events are not launch crashes.
	pub fn mark_launch_completed(&self) {
		self.inner.launch_completed.store(true, Ordering::Release);
	}

	pub fn is_launching(&self) -> bool {
		self.inner.is_launching()
	}

	/// Stops the session, removes the interceptor and drains the delivery
	/// queue for up to `grace`. Returns `true` if everything queued was sent.
	pub fn shutdown(&self, grace: Duration) -> bool {
		if self.inner.closed.swap(true, Ordering::AcqRel) {
			return true;
		}

		if let Some(handle) = self.stop_session() {
			drop(handle);
		}
		// The process hook can't be swapped while this thread unwinds; the
		// closed flag already turns our hook into a pass-through.
		if !std::thread::panicking() {
			self.interceptor.uninstall();
		}
		let drained = self.inner.queue.shutdown(grace);
		if self.inner.snapshot.logging_enabled() {
			info!(drained, "Notifier client shut down");
		}
		drained
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}
}
