// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host information attached to events.

use chrono::Utc;
use loom_notify_core::DeviceInfo;

const MEMINFO: &str = "/proc/meminfo";
const OS_RELEASE: &str = "/proc/sys/kernel/osrelease";

/// Static host facts, gathered once when the client starts.
pub(crate) fn detect() -> DeviceInfo {
	DeviceInfo {
		os_name: std::env::consts::OS.to_string(),
		os_version: read_trimmed(OS_RELEASE),
		cpu_abi: std::env::consts::ARCH.to_string(),
		locale: locale_from(|name| std::env::var(name).ok()),
		timezone: Some(chrono::Local::now().format("%:z").to_string()),
		total_memory: meminfo_bytes("MemTotal"),
		free_memory: None,
		time: None,
	}
}

/// Copies `base` with per-event values filled in. Reads no shared state, so
/// it is safe on the crash path.
pub(crate) fn stamp(base: &DeviceInfo) -> DeviceInfo {
	DeviceInfo {
		free_memory: meminfo_bytes("MemAvailable"),
		time: Some(Utc::now()),
		..base.clone()
	}
}

fn read_trimmed(path: &str) -> Option<String> {
	let text = std::fs::read_to_string(path).ok()?;
	let text = text.trim();
	(!text.is_empty()).then(|| text.to_string())
}

fn meminfo_bytes(key: &str) -> Option<u64> {
	let text = std::fs::read_to_string(MEMINFO).ok()?;
	parse_meminfo(&text, key)
}

/// Finds `key` in `/proc/meminfo` text, converting kB to bytes.
fn parse_meminfo(text: &str, key: &str) -> Option<u64> {
	text.lines().find_map(|line| {
		let (name, rest) = line.split_once(':')?;
		if name.trim() != key {
			return None;
		}
		let mut parts = rest.split_whitespace();
		let value: u64 = parts.next()?.parse().ok()?;
		match parts.next() {
			Some("kB") => value.checked_mul(1024),
			None => Some(value),
			Some(_) => None,
		}
	})
}

/// POSIX locale precedence, e.g. "en_US.UTF-8" becomes "en_US".
fn locale_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
	["LC_ALL", "LC_MESSAGES", "LANG"].into_iter().find_map(|name| {
		let value = lookup(name)?;
		let locale = value.split(['.', '@']).next().unwrap_or_default().trim();
		(!locale.is_empty() && locale != "C" && locale != "POSIX").then(|| locale.to_string())
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	const SAMPLE: &str = "\
MemTotal:       16303428 kB
MemFree:         1223456 kB
MemAvailable:    8123456 kB
HugePages_Total:       0
";

	#[test]
	fn meminfo_values_are_bytes() {
		assert_eq!(parse_meminfo(SAMPLE, "MemTotal"), Some(16_303_428 * 1024));
		assert_eq!(parse_meminfo(SAMPLE, "MemAvailable"), Some(8_123_456 * 1024));
		assert_eq!(parse_meminfo(SAMPLE, "HugePages_Total"), Some(0));
		assert_eq!(parse_meminfo(SAMPLE, "SwapTotal"), None);
		assert_eq!(parse_meminfo("MemTotal: lots kB", "MemTotal"), None);
	}

	#[test]
	fn locale_follows_posix_precedence() {
		let env: HashMap<&str, &str> =
			HashMap::from([("LC_MESSAGES", "de_DE.UTF-8"), ("LANG", "en_US.UTF-8")]);
		let lookup = |name: &str| env.get(name).map(|value| value.to_string());
		assert_eq!(locale_from(lookup).as_deref(), Some("de_DE"));

		let env: HashMap<&str, &str> = HashMap::from([("LC_ALL", "C"), ("LANG", "fr_FR@euro")]);
		let lookup = |name: &str| env.get(name).map(|value| value.to_string());
		assert_eq!(locale_from(lookup).as_deref(), Some("fr_FR"));

		assert_eq!(locale_from(|_| None), None);
	}

	#[test]
	fn detect_reports_build_target() {
		let device = detect();
		assert_eq!(device.os_name, std::env::consts::OS);
		assert_eq!(device.cpu_abi, std::env::consts::ARCH);
		assert!(device.timezone.is_some());
		assert!(device.time.is_none());
	}

	#[test]
	fn stamp_keeps_static_fields() {
		let base = DeviceInfo {
			os_name: "linux".to_string(),
			total_memory: Some(42),
			locale: Some("en_GB".to_string()),
			..DeviceInfo::default()
		};
		let stamped = stamp(&base);
		assert_eq!(stamped.os_name, "linux");
		assert_eq!(stamped.total_memory, Some(42));
		assert_eq!(stamped.locale.as_deref(), Some("en_GB"));
		assert!(stamped.time.is_some());
	}
}
