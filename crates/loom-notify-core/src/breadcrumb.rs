// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Breadcrumb types (events leading up to a failure).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A breadcrumb representing something that happened before a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
	pub timestamp: DateTime<Utc>,
	#[serde(rename = "type")]
	pub breadcrumb_type: BreadcrumbType,
	pub message: String,
	#[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
	pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Breadcrumb {
	/// Creates a breadcrumb stamped with the current time.
	pub fn new(breadcrumb_type: BreadcrumbType, message: impl Into<String>) -> Self {
		Self {
			timestamp: Utc::now(),
			breadcrumb_type,
			message: message.into(),
			metadata: serde_json::Map::new(),
		}
	}

	/// Creates a manual breadcrumb, the kind left by application code.
	pub fn manual(message: impl Into<String>) -> Self {
		Self::new(BreadcrumbType::Manual, message)
	}

	/// Attaches a metadata value to this breadcrumb.
	#[must_use]
	pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.metadata.insert(key.into(), value);
		self
	}
}

/// Kind of a breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadcrumbType {
	/// An error was captured
	Error,
	/// A log message
	Log,
	/// Left explicitly by application code
	Manual,
	/// A navigation/route change
	Navigation,
	/// A process or thread lifecycle change
	Process,
	/// An outgoing request
	Request,
	/// An application state change
	State,
	/// A user action
	User,
}

impl BreadcrumbType {
	/// All breadcrumb types, in declaration order.
	pub const ALL: [BreadcrumbType; 8] = [
		BreadcrumbType::Error,
		BreadcrumbType::Log,
		BreadcrumbType::Manual,
		BreadcrumbType::Navigation,
		BreadcrumbType::Process,
		BreadcrumbType::Request,
		BreadcrumbType::State,
		BreadcrumbType::User,
	];
}

impl fmt::Display for BreadcrumbType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Log => write!(f, "log"),
			Self::Manual => write!(f, "manual"),
			Self::Navigation => write!(f, "navigation"),
			Self::Process => write!(f, "process"),
			Self::Request => write!(f, "request"),
			Self::State => write!(f, "state"),
			Self::User => write!(f, "user"),
		}
	}
}

impl FromStr for BreadcrumbType {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"log" => Ok(Self::Log),
			"manual" => Ok(Self::Manual),
			"navigation" => Ok(Self::Navigation),
			"process" => Ok(Self::Process),
			"request" => Ok(Self::Request),
			"state" => Ok(Self::State),
			"user" => Ok(Self::User),
			_ => Err(CoreError::InvalidBreadcrumbType(s.to_string())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn breadcrumb_type_roundtrip(idx in 0usize..BreadcrumbType::ALL.len()) {
			let t = BreadcrumbType::ALL[idx];
			let parsed: BreadcrumbType = t.to_string().parse().unwrap();
			prop_assert_eq!(t, parsed);
		}
	}

	#[test]
	fn unknown_breadcrumb_type_is_rejected() {
		assert!(matches!(
			"telemetry".parse::<BreadcrumbType>(),
			Err(CoreError::InvalidBreadcrumbType(_))
		));
	}

	#[test]
	fn manual_breadcrumb_has_empty_metadata() {
		let crumb = Breadcrumb::manual("clicked save");
		assert_eq!(crumb.breadcrumb_type, BreadcrumbType::Manual);
		assert_eq!(crumb.message, "clicked save");
		assert!(crumb.metadata.is_empty());
	}

	#[test]
	fn metadata_is_skipped_when_empty() {
		let json = serde_json::to_value(Breadcrumb::manual("x")).unwrap();
		assert!(json.get("metadata").is_none());
		assert_eq!(json["type"], "manual");

		let json =
			serde_json::to_value(Breadcrumb::manual("x").with_metadata("id", 7.into())).unwrap();
		assert_eq!(json["metadata"]["id"], 7);
	}
}
