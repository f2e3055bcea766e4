// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Namespaced key/value metadata attached to events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder written in place of redacted values.
pub const REDACTED: &str = "[REDACTED]";

type Section = serde_json::Map<String, serde_json::Value>;

/// Metadata grouped into named sections (`section -> key -> value`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
	sections: BTreeMap<String, Section>,
}

impl Metadata {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets a single value, creating the section when needed.
	pub fn add(&mut self, section: &str, key: impl Into<String>, value: serde_json::Value) {
		self
			.sections
			.entry(section.to_string())
			.or_default()
			.insert(key.into(), value);
	}

	/// Merges every key of `values` into `section`.
	pub fn add_section(&mut self, section: &str, values: Section) {
		self
			.sections
			.entry(section.to_string())
			.or_default()
			.extend(values);
	}

	pub fn clear(&mut self, section: &str, key: &str) {
		if let Some(values) = self.sections.get_mut(section) {
			values.remove(key);
			if values.is_empty() {
				self.sections.remove(section);
			}
		}
	}

	pub fn clear_section(&mut self, section: &str) {
		self.sections.remove(section);
	}

	pub fn get(&self, section: &str, key: &str) -> Option<&serde_json::Value> {
		self.sections.get(section).and_then(|values| values.get(key))
	}

	pub fn get_section(&self, section: &str) -> Option<&Section> {
		self.sections.get(section)
	}

	pub fn is_empty(&self) -> bool {
		self.sections.is_empty()
	}

	/// Overlays `other` on top of `self`; keys in `other` win.
	pub fn merge(&mut self, other: &Metadata) {
		for (section, values) in &other.sections {
			self.add_section(section, values.clone());
		}
	}

	/// Returns a copy where every value whose key contains one of
	/// `redact_keys` is replaced with [`REDACTED`]. Nested objects are
	/// redacted recursively.
	#[must_use]
	pub fn redacted_with(&self, redact_keys: &[String]) -> Metadata {
		if redact_keys.is_empty() {
			return self.clone();
		}

		let sections = self
			.sections
			.iter()
			.map(|(name, values)| (name.clone(), redact_map(values, redact_keys)))
			.collect();
		Metadata { sections }
	}
}

fn redact_map(values: &Section, redact_keys: &[String]) -> Section {
	values
		.iter()
		.map(|(key, value)| {
			let value = if redact_keys.iter().any(|r| key.contains(r.as_str())) {
				serde_json::Value::String(REDACTED.to_string())
			} else if let serde_json::Value::Object(nested) = value {
				serde_json::Value::Object(redact_map(nested, redact_keys))
			} else {
				value.clone()
			};
			(key.clone(), value)
		})
		.collect()
}
