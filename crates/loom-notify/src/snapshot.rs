// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable configuration frozen from a [`Configuration`].
//!
//! All normalization happens here: breadcrumb capacity is clamped to
//! `[0, 100]`, the launch-crash threshold to `>= 0`, and string lists become
//! deduplicated sets that keep their first-seen order.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loom_notify_core::{BreadcrumbType, Metadata};

use crate::callbacks::CallbackRegistry;
use crate::config::{Configuration, Endpoints};
use crate::delivery::Delivery;
use crate::error::{NotifySdkError, Result};

/// Upper bound for the breadcrumb ring.
pub const MAX_BREADCRUMB_CAPACITY: usize = 100;

const PRODUCTION_STAGE: &str = "production";

/// Read-only view of the configuration used by every other component.
pub struct ConfigSnapshot {
	api_key: String,
	app_version: Option<String>,
	version_code: Option<i64>,
	build_uuid: Option<String>,
	code_bundle_id: Option<String>,
	app_type: String,
	release_stage: Option<String>,
	context: Option<String>,
	send_threads: bool,
	persist_user: bool,
	auto_track_sessions: bool,
	auto_detect_errors: bool,
	detect_native_crashes: bool,
	logging_enabled: bool,
	max_breadcrumbs: usize,
	launch_crash_threshold_ms: u64,
	persistence_directory: Option<PathBuf>,
	max_persisted_events: usize,
	ignore_classes: Vec<String>,
	enabled_release_stages: Vec<String>,
	project_packages: Vec<String>,
	redact_keys: Vec<String>,
	enabled_breadcrumb_types: Vec<BreadcrumbType>,
	endpoints: Endpoints,
	delivery: Arc<dyn Delivery>,
	metadata: Metadata,
	callbacks: Arc<CallbackRegistry>,
}

impl ConfigSnapshot {
	/// Validates and freezes `config`.
	///
	/// # Errors
	///
	/// Returns [`NotifySdkError::ConfigValidation`] for a blank API key and
	/// [`NotifySdkError::MissingDelivery`] when no transport is set.
	pub fn build(config: &Configuration) -> Result<Arc<Self>> {
		if config.api_key.trim().is_empty() {
			return Err(NotifySdkError::ConfigValidation(
				"API key must not be blank".to_string(),
			));
		}
		let delivery = config
			.delivery
			.clone()
			.ok_or(NotifySdkError::MissingDelivery)?;

		let logging_enabled = config
			.logging_enabled
			.unwrap_or_else(|| config.release_stage.as_deref() != Some(PRODUCTION_STAGE));

		Ok(Arc::new(Self {
			api_key: config.api_key.clone(),
			app_version: config.app_version.clone(),
			version_code: config.version_code,
			build_uuid: config.build_uuid.clone(),
			code_bundle_id: config.code_bundle_id.clone(),
			app_type: config.app_type.clone(),
			release_stage: config.release_stage.clone(),
			context: config.context.clone(),
			send_threads: config.send_threads,
			persist_user: config.persist_user,
			auto_track_sessions: config.auto_track_sessions,
			auto_detect_errors: config.auto_detect_errors,
			detect_native_crashes: config.detect_native_crashes,
			logging_enabled,
			max_breadcrumbs: clamp_breadcrumbs(config.max_breadcrumbs),
			launch_crash_threshold_ms: clamp_threshold(config.launch_crash_threshold_ms),
			persistence_directory: config.persistence_directory.clone(),
			max_persisted_events: config.max_persisted_events.max(0) as usize,
			ignore_classes: ordered_set(&config.ignore_classes),
			enabled_release_stages: ordered_set(&config.enabled_release_stages),
			project_packages: ordered_set(&config.project_packages),
			redact_keys: ordered_set(&config.redact_keys),
			enabled_breadcrumb_types: ordered_set(&config.enabled_breadcrumb_types),
			endpoints: config.endpoints.clone(),
			delivery,
			metadata: config.metadata.clone(),
			callbacks: Arc::clone(config.callbacks()),
		}))
	}

	pub fn api_key(&self) -> &str {
		&self.api_key
	}

	pub fn app_version(&self) -> Option<&str> {
		self.app_version.as_deref()
	}

	pub fn version_code(&self) -> Option<i64> {
		self.version_code
	}

	pub fn build_uuid(&self) -> Option<&str> {
		self.build_uuid.as_deref()
	}

	pub fn code_bundle_id(&self) -> Option<&str> {
		self.code_bundle_id.as_deref()
	}

	pub fn app_type(&self) -> &str {
		&self.app_type
	}

	pub fn release_stage(&self) -> Option<&str> {
		self.release_stage.as_deref()
	}

	pub fn context(&self) -> Option<&str> {
		self.context.as_deref()
	}

	pub fn send_threads(&self) -> bool {
		self.send_threads
	}

	pub fn persist_user(&self) -> bool {
		self.persist_user
	}

	pub fn auto_track_sessions(&self) -> bool {
		self.auto_track_sessions
	}

	pub fn auto_detect_errors(&self) -> bool {
		self.auto_detect_errors
	}

	pub fn detect_native_crashes(&self) -> bool {
		self.detect_native_crashes
	}

	/// Whether informational SDK logging is on.
	pub fn logging_enabled(&self) -> bool {
		self.logging_enabled
	}

	/// Breadcrumb ring capacity, always within `[0, 100]`.
	pub fn max_breadcrumbs(&self) -> usize {
		self.max_breadcrumbs
	}

	/// Milliseconds after start during which a failure counts as a launch crash.
	pub fn launch_crash_threshold_ms(&self) -> u64 {
		self.launch_crash_threshold_ms
	}

	pub fn persistence_directory(&self) -> Option<&Path> {
		self.persistence_directory.as_deref()
	}

	/// Cap on persisted events, always `>= 0`.
	pub fn max_persisted_events(&self) -> usize {
		self.max_persisted_events
	}

	pub fn ignore_classes(&self) -> &[String] {
		&self.ignore_classes
	}

	pub fn enabled_release_stages(&self) -> &[String] {
		&self.enabled_release_stages
	}

	pub fn project_packages(&self) -> &[String] {
		&self.project_packages
	}

	pub fn redact_keys(&self) -> &[String] {
		&self.redact_keys
	}

	pub fn enabled_breadcrumb_types(&self) -> &[BreadcrumbType] {
		&self.enabled_breadcrumb_types
	}

	pub fn endpoints(&self) -> &Endpoints {
		&self.endpoints
	}

	pub fn delivery(&self) -> &Arc<dyn Delivery> {
		&self.delivery
	}

	/// Metadata captured at build time.
	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	/// The live callback registry shared with the source configuration.
	pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
		&self.callbacks
	}

	/// An empty stage list enables every stage. Otherwise the release stage
	/// must be set and listed.
	pub fn should_notify_for_release_stage(&self) -> bool {
		if self.enabled_release_stages.is_empty() {
			return true;
		}
		self.release_stage
			.as_deref()
			.is_some_and(|stage| self.enabled_release_stages.iter().any(|s| s == stage))
	}

	pub fn should_ignore_class(&self, error_class: &str) -> bool {
		self.ignore_classes.iter().any(|c| c == error_class)
	}

	pub fn should_record_breadcrumb_type(&self, breadcrumb_type: BreadcrumbType) -> bool {
		self.enabled_breadcrumb_types.contains(&breadcrumb_type)
	}

	/// Whether `module` belongs to one of the project packages.
	pub fn is_project_frame(&self, module: &str) -> bool {
		self.project_packages.iter().any(|package| {
			module == package
				|| module
					.strip_prefix(package.as_str())
					.is_some_and(|rest| rest.starts_with("::"))
		})
	}
}

impl fmt::Debug for ConfigSnapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConfigSnapshot")
			.field("api_key", &"[REDACTED]")
			.field("app_version", &self.app_version)
			.field("release_stage", &self.release_stage)
			.field("max_breadcrumbs", &self.max_breadcrumbs)
			.field("launch_crash_threshold_ms", &self.launch_crash_threshold_ms)
			.field("logging_enabled", &self.logging_enabled)
			.field("endpoints", &self.endpoints)
			.finish_non_exhaustive()
	}
}

fn clamp_breadcrumbs(raw: i64) -> usize {
	raw.clamp(0, MAX_BREADCRUMB_CAPACITY as i64) as usize
}

fn clamp_threshold(raw: i64) -> u64 {
	raw.max(0) as u64
}

fn ordered_set<T>(values: &[T]) -> Vec<T>
where
	T: Clone + Eq + std::hash::Hash,
{
	let mut seen = HashSet::with_capacity(values.len());
	values
		.iter()
		.filter(|value| seen.insert(*value))
		.cloned()
		.collect()
}

/// Builds a snapshot over a recording transport after applying `edit`.
#[cfg(test)]
pub(crate) fn test_snapshot(edit: impl FnOnce(&mut Configuration)) -> Arc<ConfigSnapshot> {
	let mut config = Configuration::new("k1");
	config.set_delivery(Arc::new(crate::delivery::testing::RecordingDelivery::new(
		crate::delivery::DeliveryStatus::Delivered,
	)));
	edit(&mut config);
	ConfigSnapshot::build(&config).expect("test configuration is valid")
}
