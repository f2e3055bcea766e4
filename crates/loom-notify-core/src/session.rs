// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session types for release-health tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}

	#[must_use]
	pub fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for SessionId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// A session as seen by session callbacks and the sessions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	/// Handled errors during the session
	pub handled_count: u32,
	/// Unhandled errors (crashes) during the session
	pub unhandled_count: u32,
	/// Set once the session has been stopped
	pub ended_at: Option<DateTime<Utc>>,
}

impl SessionPayload {
	/// A fresh payload for a session starting now.
	#[must_use]
	pub fn starting(id: SessionId) -> Self {
		Self {
			id,
			started_at: Utc::now(),
			handled_count: 0,
			unhandled_count: 0,
			ended_at: None,
		}
	}

	#[must_use]
	pub fn crashed(&self) -> bool {
		self.unhandled_count > 0
	}

	/// Milliseconds between start and end, if ended.
	#[must_use]
	pub fn duration_ms(&self) -> Option<u64> {
		self
			.ended_at
			.map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn session_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = SessionId(Uuid::from_bytes(uuid_bytes));
			let parsed: SessionId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}
	}

	#[test]
	fn new_session_ids_differ() {
		assert_ne!(SessionId::new(), SessionId::new());
	}

	#[test]
	fn starting_payload_is_clean() {
		let payload = SessionPayload::starting(SessionId::new());
		assert_eq!(payload.handled_count, 0);
		assert_eq!(payload.unhandled_count, 0);
		assert!(!payload.crashed());
		assert!(payload.duration_ms().is_none());
	}

	#[test]
	fn duration_is_never_negative() {
		let mut payload = SessionPayload::starting(SessionId::new());
		payload.ended_at = Some(payload.started_at - chrono::Duration::seconds(1));
		assert_eq!(payload.duration_ms(), Some(0));
	}
}
