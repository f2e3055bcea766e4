// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User-editable notifier configuration.
//!
//! A [`Configuration`] is mutated freely during startup and then frozen into a
//! [`ConfigSnapshot`](crate::ConfigSnapshot). No value is clamped or validated
//! here; normalization happens when the snapshot is built.

use std::path::PathBuf;
use std::sync::Arc;
use std::{env, fmt, fs};

use loom_notify_core::{BreadcrumbType, Metadata};
use thiserror::Error;

use crate::callbacks::{CallbackRegistry, OnBreadcrumb, OnError, OnSession};
use crate::delivery::Delivery;

/// Default error-reporting endpoint.
pub const DEFAULT_NOTIFY_ENDPOINT: &str = "https://notify.bugsnag.com";
/// Default session-reporting endpoint.
pub const DEFAULT_SESSIONS_ENDPOINT: &str = "https://sessions.bugsnag.com";
/// Default number of breadcrumbs kept.
pub const DEFAULT_MAX_BREADCRUMBS: i64 = 25;
/// Default window after start in which a crash counts as a launch crash.
pub const DEFAULT_LAUNCH_CRASH_THRESHOLD_MS: i64 = 5000;
/// Default number of undelivered events kept on disk.
pub const DEFAULT_MAX_PERSISTED_EVENTS: i64 = 32;

const ENV_API_KEY: &str = "LOOM_NOTIFY_API_KEY";
const ENV_RELEASE_STAGE: &str = "LOOM_NOTIFY_RELEASE_STAGE";
const ENV_APP_VERSION: &str = "LOOM_NOTIFY_APP_VERSION";
const ENV_NOTIFY_ENDPOINT: &str = "LOOM_NOTIFY_NOTIFY_ENDPOINT";
const ENV_SESSIONS_ENDPOINT: &str = "LOOM_NOTIFY_SESSIONS_ENDPOINT";
const ENV_MAX_BREADCRUMBS: &str = "LOOM_NOTIFY_MAX_BREADCRUMBS";
const ENV_PERSISTENCE_DIR: &str = "LOOM_NOTIFY_PERSISTENCE_DIR";

/// Errors raised while discovering configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Neither `VAR` nor `VAR_FILE` is set.
	#[error("required setting not found: set either {var} or {var}_FILE")]
	Missing { var: String },

	/// Failed to read the file named by `VAR_FILE`.
	#[error("failed to read {var}_FILE at {path}: {source}")]
	Io {
		var: String,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// `VAR_FILE` is set but empty.
	#[error("{var}_FILE is set but empty")]
	EmptyPath { var: String },

	/// A numeric setting did not parse.
	#[error("{var} must be an integer, got {value:?}")]
	InvalidNumber { var: String, value: String },
}

/// Error and session endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
	pub notify: String,
	pub sessions: String,
}

impl Endpoints {
	pub fn new(notify: impl Into<String>, sessions: impl Into<String>) -> Self {
		Self {
			notify: notify.into(),
			sessions: sessions.into(),
		}
	}
}

impl Default for Endpoints {
	fn default() -> Self {
		Self::new(DEFAULT_NOTIFY_ENDPOINT, DEFAULT_SESSIONS_ENDPOINT)
	}
}

/// Mutable notifier configuration, edited during startup.
///
/// Not intended for concurrent mutation. Callback registration is the
/// exception: the registry is shared with the client and stays live for the
/// process lifetime.
pub struct Configuration {
	pub api_key: String,

	pub app_version: Option<String>,
	pub version_code: Option<i64>,
	pub build_uuid: Option<String>,
	pub code_bundle_id: Option<String>,
	pub app_type: String,
	pub release_stage: Option<String>,
	pub context: Option<String>,

	pub send_threads: bool,
	pub persist_user: bool,
	pub auto_track_sessions: bool,
	pub auto_detect_errors: bool,
	/// Native crash capture is supplied by a separate plugin; this only
	/// records whether one is expected.
	pub detect_native_crashes: bool,
	/// `None` derives the value from the release stage.
	pub logging_enabled: Option<bool>,

	/// Raw value; clamped to `[0, 100]` at snapshot time.
	pub max_breadcrumbs: i64,
	/// Raw value; clamped to `>= 0` at snapshot time.
	pub launch_crash_threshold_ms: i64,

	/// Where events that could not be delivered are kept until the next
	/// start. `None` disables persistence.
	pub persistence_directory: Option<PathBuf>,
	/// Raw value; clamped to `>= 0` at snapshot time. Oldest files go first.
	pub max_persisted_events: i64,

	pub ignore_classes: Vec<String>,
	pub enabled_release_stages: Vec<String>,
	pub project_packages: Vec<String>,
	pub redact_keys: Vec<String>,
	pub enabled_breadcrumb_types: Vec<BreadcrumbType>,

	pub endpoints: Endpoints,
	pub delivery: Option<Arc<dyn Delivery>>,

	pub metadata: Metadata,
	callbacks: Arc<CallbackRegistry>,
}

impl Configuration {
	/// Creates a configuration with default settings for `api_key`.
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			api_key: api_key.into(),
			app_version: None,
			version_code: Some(0),
			build_uuid: None,
			code_bundle_id: None,
			app_type: "rust".to_string(),
			release_stage: None,
			context: None,
			send_threads: true,
			persist_user: false,
			auto_track_sessions: true,
			auto_detect_errors: true,
			detect_native_crashes: false,
			logging_enabled: None,
			max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
			launch_crash_threshold_ms: DEFAULT_LAUNCH_CRASH_THRESHOLD_MS,
			persistence_directory: None,
			max_persisted_events: DEFAULT_MAX_PERSISTED_EVENTS,
			ignore_classes: Vec::new(),
			enabled_release_stages: Vec::new(),
			project_packages: Vec::new(),
			redact_keys: Vec::new(),
			enabled_breadcrumb_types: BreadcrumbType::ALL.to_vec(),
			endpoints: Endpoints::default(),
			delivery: None,
			metadata: Metadata::new(),
			callbacks: Arc::new(CallbackRegistry::new()),
		}
	}

	/// Discovers a configuration from `LOOM_NOTIFY_*` environment variables.
	///
	/// The API key may be given directly (`LOOM_NOTIFY_API_KEY`) or as a file
	/// path (`LOOM_NOTIFY_API_KEY_FILE`), the latter taking precedence. A
	/// transport still has to be supplied before building a snapshot.
	pub fn from_env() -> Result<Self, ConfigError> {
		let api_key = read_env(ENV_API_KEY)?.ok_or_else(|| ConfigError::Missing {
			var: ENV_API_KEY.to_string(),
		})?;

		let mut config = Self::new(api_key);
		config.release_stage = read_env(ENV_RELEASE_STAGE)?;
		config.app_version = read_env(ENV_APP_VERSION)?;

		if let Some(notify) = read_env(ENV_NOTIFY_ENDPOINT)? {
			config.endpoints.notify = notify;
		}
		if let Some(sessions) = read_env(ENV_SESSIONS_ENDPOINT)? {
			config.endpoints.sessions = sessions;
		}
		if let Some(raw) = read_env(ENV_MAX_BREADCRUMBS)? {
			config.max_breadcrumbs =
				raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
					var: ENV_MAX_BREADCRUMBS.to_string(),
					value: raw.clone(),
				})?;
		}
		config.persistence_directory = read_env(ENV_PERSISTENCE_DIR)?.map(PathBuf::from);

		Ok(config)
	}

	/// Sets the transport used to deliver payloads.
	pub fn set_delivery(&mut self, delivery: Arc<dyn Delivery>) {
		self.delivery = Some(delivery);
	}

	/// The callback registry shared with clients built from this configuration.
	pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
		&self.callbacks
	}

	pub fn add_on_error(&self, callback: OnError) -> bool {
		self.callbacks.add_on_error(callback)
	}

	pub fn remove_on_error(&self, callback: &OnError) -> bool {
		self.callbacks.remove_on_error(callback)
	}

	pub fn add_on_breadcrumb(&self, callback: OnBreadcrumb) -> bool {
		self.callbacks.add_on_breadcrumb(callback)
	}

	pub fn remove_on_breadcrumb(&self, callback: &OnBreadcrumb) -> bool {
		self.callbacks.remove_on_breadcrumb(callback)
	}

	pub fn add_on_session(&self, callback: OnSession) -> bool {
		self.callbacks.add_on_session(callback)
	}

	pub fn remove_on_session(&self, callback: &OnSession) -> bool {
		self.callbacks.remove_on_session(callback)
	}

	pub fn add_metadata(&mut self, section: &str, key: impl Into<String>, value: serde_json::Value) {
		self.metadata.add(section, key, value);
	}

	pub fn clear_metadata(&mut self, section: &str, key: &str) {
		self.metadata.clear(section, key);
	}

	pub fn get_metadata(&self, section: &str, key: &str) -> Option<&serde_json::Value> {
		self.metadata.get(section, key)
	}
}

impl fmt::Debug for Configuration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Configuration")
			.field("release_stage", &self.release_stage)
			.field("app_version", &self.app_version)
			.field("endpoints", &self.endpoints)
			.field("max_breadcrumbs", &self.max_breadcrumbs)
			.field("launch_crash_threshold_ms", &self.launch_crash_threshold_ms)
			.field("persistence_directory", &self.persistence_directory)
			.field("has_delivery", &self.delivery.is_some())
			.finish_non_exhaustive()
	}
}

/// Reads `VAR`, or the contents of the file named by `VAR_FILE`.
///
/// A single trailing newline is stripped from file contents.
fn read_env(var: &str) -> Result<Option<String>, ConfigError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(ConfigError::EmptyPath {
				var: var.to_string(),
			});
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
			var: var.to_string(),
			path: path.clone(),
			source,
		})?;
		return Ok(Some(
			content.strip_suffix('\n').unwrap_or(&content).to_string(),
		));
	}

	Ok(env::var(var).ok())
}
