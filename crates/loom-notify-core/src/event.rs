// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Captured event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::breadcrumb::Breadcrumb;
use crate::error::CoreError;
use crate::metadata::Metadata;
use crate::session::SessionId;

/// Unique identifier for a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}
}

impl Default for EventId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for EventId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Severity of a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Error,
	Warning,
	Info,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Warning => write!(f, "warning"),
			Self::Info => write!(f, "info"),
		}
	}
}

impl FromStr for Severity {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"warning" => Ok(Self::Warning),
			"info" => Ok(Self::Info),
			_ => Err(CoreError::InvalidSeverity(s.to_string())),
		}
	}
}

/// Why an event was captured, and therefore whether it counts as unhandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityReason {
	/// Captured by the process-wide panic interceptor
	UnhandledPanic,
	/// An error passed to `notify`
	HandledError,
	/// A message passed to `notify_message`
	HandledMessage,
	/// The caller chose the severity at notify time
	UserSpecifiedSeverity,
	/// An error callback changed the severity
	CallbackSpecifiedSeverity,
}

impl SeverityReason {
	/// Unhandled events count towards a session's crash counter.
	pub fn is_unhandled(&self) -> bool {
		matches!(self, Self::UnhandledPanic)
	}

	/// Default severity for this reason.
	pub fn default_severity(&self) -> Severity {
		match self {
			Self::UnhandledPanic | Self::HandledError => Severity::Error,
			Self::HandledMessage => Severity::Info,
			Self::UserSpecifiedSeverity | Self::CallbackSpecifiedSeverity => Severity::Warning,
		}
	}
}

/// Thread that raised the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
	/// Debug rendering of `std::thread::ThreadId`
	pub id: String,
	pub name: Option<String>,
	/// Whether this is the thread the failure happened on
	pub crashed: bool,
}

impl ThreadInfo {
	/// Describes the calling thread.
	pub fn current(crashed: bool) -> Self {
		let thread = std::thread::current();
		Self {
			id: format!("{:?}", thread.id()),
			name: thread.name().map(str::to_string),
			crashed,
		}
	}
}

/// A single stack frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
	pub function: Option<String>,
	/// Module path derived from the demangled function name
	pub module: Option<String>,
	pub file: Option<String>,
	pub line: Option<u32>,
	/// Whether the frame belongs to one of the configured project packages
	pub in_project: bool,
}

/// The failure itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
	/// Type name of the error, or "panic"
	pub error_class: String,
	pub message: String,
	#[serde(default)]
	pub stacktrace: Vec<Frame>,
}

/// Application information attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
	pub version: Option<String>,
	pub version_code: Option<i64>,
	pub build_uuid: Option<String>,
	pub code_bundle_id: Option<String>,
	pub release_stage: Option<String>,
	/// "rust" unless overridden
	pub app_type: String,
	/// Milliseconds since the client was started
	pub duration_ms: u64,
	/// Whether the failure happened within the launch-crash threshold
	pub is_launching: bool,
}

/// User attached to events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: Option<String>,
	pub email: Option<String>,
	pub name: Option<String>,
}

/// Host the event was captured on.
///
/// The static part is detected once when the client starts; `time` and
/// `free_memory` are refreshed per event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
	/// `std::env::consts::OS`, e.g. "linux"
	pub os_name: String,
	/// Kernel release where the platform exposes one
	pub os_version: Option<String>,
	/// `std::env::consts::ARCH`, e.g. "x86_64"
	pub cpu_abi: String,
	pub locale: Option<String>,
	/// UTC offset such as "+02:00"
	pub timezone: Option<String>,
	pub total_memory: Option<u64>,
	pub free_memory: Option<u64>,
	pub time: Option<DateTime<Utc>>,
}

/// The session an event was captured in, with its counters at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSession {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	pub handled_count: u32,
	pub unhandled_count: u32,
}

/// One captured failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub id: EventId,
	pub error: ErrorInfo,
	pub severity: Severity,
	pub severity_reason: SeverityReason,
	/// Tracks `severity_reason.is_unhandled()` unless changed by a callback
	pub unhandled: bool,
	pub thread: Option<ThreadInfo>,
	pub breadcrumbs: Vec<Breadcrumb>,
	pub metadata: Metadata,
	pub context: Option<String>,
	pub app: AppInfo,
	#[serde(default)]
	pub device: DeviceInfo,
	pub user: Option<User>,
	/// Session active when the event was captured. Its counts are updated once
	/// callbacks accept the event; the session itself is never reassigned.
	pub session: Option<EventSession>,
	pub timestamp: DateTime<Utc>,
}

impl Event {
	/// Creates an event for `error` with the severity implied by `reason`.
	pub fn new(error: ErrorInfo, reason: SeverityReason) -> Self {
		Self {
			id: EventId::new(),
			error,
			severity: reason.default_severity(),
			severity_reason: reason,
			unhandled: reason.is_unhandled(),
			thread: None,
			breadcrumbs: Vec::new(),
			metadata: Metadata::default(),
			context: None,
			app: AppInfo::default(),
			device: DeviceInfo::default(),
			user: None,
			session: None,
			timestamp: Utc::now(),
		}
	}

	/// Changes the severity, recording that it was overridden.
	pub fn set_severity(&mut self, severity: Severity) {
		if self.severity != severity {
			self.severity = severity;
			self.severity_reason = SeverityReason::CallbackSpecifiedSeverity;
		}
	}

	pub fn error_class(&self) -> &str {
		&self.error.error_class
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn panic_error() -> ErrorInfo {
		ErrorInfo {
			error_class: "panic".to_string(),
			message: "boom".to_string(),
			stacktrace: Vec::new(),
		}
	}

	proptest! {
		#[test]
		fn event_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = EventId(Uuid::from_bytes(uuid_bytes));
			let parsed: EventId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}

		#[test]
		fn severity_roundtrip(severity in prop_oneof![
			Just(Severity::Error),
			Just(Severity::Warning),
			Just(Severity::Info),
		]) {
			let parsed: Severity = severity.to_string().parse().unwrap();
			prop_assert_eq!(severity, parsed);
		}
	}

	#[test]
	fn unhandled_panic_event_defaults() {
		let event = Event::new(panic_error(), SeverityReason::UnhandledPanic);
		assert!(event.unhandled);
		assert_eq!(event.severity, Severity::Error);
		assert!(event.session.is_none());
		assert!(event.breadcrumbs.is_empty());
	}

	#[test]
	fn events_without_device_still_decode() {
		let event = Event::new(panic_error(), SeverityReason::HandledError);
		let mut value = serde_json::to_value(&event).unwrap();
		value.as_object_mut().unwrap().remove("device");
		let decoded: Event = serde_json::from_value(value).unwrap();
		assert_eq!(decoded.device, DeviceInfo::default());
	}

	#[test]
	fn handled_message_defaults_to_info() {
		let event = Event::new(panic_error(), SeverityReason::HandledMessage);
		assert!(!event.unhandled);
		assert_eq!(event.severity, Severity::Info);
	}

	#[test]
	fn set_severity_records_callback_reason() {
		let mut event = Event::new(panic_error(), SeverityReason::HandledError);
		event.set_severity(Severity::Error);
		assert_eq!(event.severity_reason, SeverityReason::HandledError);

		event.set_severity(Severity::Info);
		assert_eq!(event.severity, Severity::Info);
		assert_eq!(
			event.severity_reason,
			SeverityReason::CallbackSpecifiedSeverity
		);
	}

	#[test]
	fn thread_info_current_names_test_thread() {
		let info = ThreadInfo::current(true);
		assert!(info.crashed);
		assert!(info.id.starts_with("ThreadId("));
	}
}
