// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery parameter types shared with transports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Header carrying the project API key verbatim.
pub const HEADER_API_KEY: &str = "Bugsnag-Api-Key";
/// Header carrying the time the payload was sent.
pub const HEADER_SENT_AT: &str = "Bugsnag-Sent-At";
/// Header carrying the payload schema version.
pub const HEADER_PAYLOAD_VERSION: &str = "Bugsnag-Payload-Version";

/// Kind of payload being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
	Error,
	Session,
}

impl PayloadKind {
	/// Schema version sent in [`HEADER_PAYLOAD_VERSION`].
	pub fn payload_version(&self) -> &'static str {
		match self {
			Self::Error => "4.0",
			Self::Session => "1.0",
		}
	}
}

impl fmt::Display for PayloadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Session => write!(f, "session"),
		}
	}
}

impl FromStr for PayloadKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"session" => Ok(Self::Session),
			_ => Err(CoreError::InvalidPayloadKind(s.to_string())),
		}
	}
}

/// Target URL and headers for one delivery call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryParams {
	pub url: String,
	pub headers: BTreeMap<String, String>,
}

impl DeliveryParams {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn payload_versions_are_fixed_per_kind() {
		assert_eq!(PayloadKind::Error.payload_version(), "4.0");
		assert_eq!(PayloadKind::Session.payload_version(), "1.0");
	}

	#[test]
	fn payload_kind_parse() {
		assert_eq!("error".parse::<PayloadKind>().unwrap(), PayloadKind::Error);
		assert_eq!(
			"session".parse::<PayloadKind>().unwrap(),
			PayloadKind::Session
		);
		assert!("metrics".parse::<PayloadKind>().is_err());
	}

	#[test]
	fn header_lookup() {
		let mut headers = BTreeMap::new();
		headers.insert(HEADER_API_KEY.to_string(), "k1".to_string());
		let params = DeliveryParams {
			url: "https://notify.example.com".to_string(),
			headers,
		};
		assert_eq!(params.header(HEADER_API_KEY), Some("k1"));
		assert_eq!(params.header(HEADER_SENT_AT), None);
	}
}
