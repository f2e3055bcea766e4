// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the notifier SDK.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::delivery::DeliveryStatus;

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, NotifySdkError>;

/// Errors that can occur in the notifier SDK.
#[derive(Debug, Error)]
pub enum NotifySdkError {
	/// The configuration cannot be frozen into a snapshot.
	#[error("invalid configuration: {0}")]
	ConfigValidation(String),

	/// No transport was supplied before building the snapshot.
	#[error("a delivery transport is required")]
	MissingDelivery,

	/// Loading configuration from the environment failed.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// A user callback panicked. Logged and treated as "continue".
	#[error("{category} callback panicked: {message}")]
	CallbackExecution {
		/// Callback category ("error", "breadcrumb" or "session").
		category: &'static str,
		/// Panic payload rendered as text.
		message: String,
	},

	/// The transport did not accept the payload.
	#[error("delivery failed with status {status:?}")]
	Delivery {
		/// Final status after all attempts.
		status: DeliveryStatus,
	},

	/// The delivery was cancelled before it completed.
	#[error("delivery cancelled")]
	Cancelled,

	/// The client has been shut down.
	#[error("notifier client has been shut down")]
	ClientShutdown,

	/// Failed to serialize a payload.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Reading or writing a persisted payload failed.
	#[error("payload store error at {path}: {source}")]
	Store {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The background delivery worker could not be started.
	#[error("failed to start delivery worker: {0}")]
	WorkerSpawn(#[from] std::io::Error),
}
