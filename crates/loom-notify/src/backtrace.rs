// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Converts `std::backtrace::Backtrace` output into event stack frames.
//!
//! Both display formats of `Backtrace` are understood: the short one
//! (`N: symbol`) and the full one (`N: 0x<ip> - symbol`, with hashes and
//! crate disambiguators). Symbols inlined into a frame are printed on
//! unnumbered lines and become frames of their own.

use std::backtrace::Backtrace;

use loom_notify_core::Frame;
use rustc_demangle::demangle;

use crate::snapshot::ConfigSnapshot;

/// Backtrace capture, the panic hook and the panic runtime. A leading run of
/// these is dropped so a trace starts where the failure happened.
const RUNTIME_PREFIXES: &[&str] = &[
	"std::backtrace::",
	"std::backtrace_rs::",
	"backtrace::",
	"std::panicking::",
	"core::panicking::",
	"std::sys::backtrace::",
	"rust_begin_unwind",
	"__rustc::",
	"__rust_",
	"core::result::unwrap_failed",
	"core::option::unwrap_failed",
	"core::option::expect_failed",
	"loom_notify::interceptor::Interceptor::",
	"loom_notify::interceptor::UnhandledFailure::",
	"loom_notify::interceptor::suppress_reporting",
	"loom_notify::client::Client::",
];

const UNKNOWN_SYMBOL: &str = "<unknown>";

/// Parses `backtrace`, marking frames in the snapshot's project packages.
pub fn stacktrace_from(backtrace: &Backtrace, snapshot: &ConfigSnapshot) -> Vec<Frame> {
	let rendered = backtrace.to_string();
	parse_frames(&rendered, |module| snapshot.is_project_frame(module))
}

fn parse_frames(rendered: &str, is_project: impl Fn(&str) -> bool) -> Vec<Frame> {
	let mut frames: Vec<Frame> = Vec::new();

	for line in rendered.lines().map(str::trim) {
		if line.is_empty() || line.starts_with("note:") {
			continue;
		}

		// "at src/main.rs:10:5" belongs to the symbol above it.
		if let Some(location) = line.strip_prefix("at ") {
			if let Some(frame) = frames.last_mut() {
				let (file, line_no) = split_location(location);
				frame.file = Some(file);
				frame.line = line_no;
			}
			continue;
		}

		let symbol = match strip_frame_number(line) {
			Some(symbol) => symbol,
			None if !frames.is_empty() => line,
			None => continue,
		};
		let symbol = strip_address(symbol);
		if symbol.is_empty() {
			continue;
		}

		let function = (symbol != UNKNOWN_SYMBOL).then(|| clean_symbol(symbol));
		let module = function.as_deref().and_then(module_of);
		let in_project = module.as_deref().is_some_and(&is_project);

		frames.push(Frame {
			function,
			module,
			file: None,
			line: None,
			in_project,
		});
	}

	let start = frames
		.iter()
		.position(|frame| !is_runtime_frame(frame.function.as_deref()))
		.unwrap_or(frames.len());
	if start < frames.len() {
		frames.drain(..start);
	}
	frames
}

fn is_runtime_frame(function: Option<&str>) -> bool {
	let Some(function) = function else {
		return true;
	};
	RUNTIME_PREFIXES.iter().any(|prefix| function.starts_with(prefix))
		|| (function.starts_with("<alloc::boxed::Box<")
			&& function.contains("core::ops::function::Fn"))
}

/// Strips the "N: " frame number; `None` for unnumbered lines.
fn strip_frame_number(line: &str) -> Option<&str> {
	let (prefix, rest) = line.split_once(':')?;
	let prefix = prefix.trim();
	(!prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit())).then(|| rest.trim())
}

/// Strips the "0x<ip> - " prefix of the full format.
fn strip_address(symbol: &str) -> &str {
	symbol
		.strip_prefix("0x")
		.and_then(|rest| rest.split_once(" - "))
		.filter(|(ip, _)| ip.chars().all(|c| c.is_ascii_hexdigit()))
		.map_or(symbol, |(_, name)| name.trim())
}

/// Demangles `symbol` and drops hashes and crate disambiguators.
fn clean_symbol(symbol: &str) -> String {
	let demangled = format!("{:#}", demangle(symbol));
	let without_hash = match demangled.rsplit_once("::h") {
		Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
			head
		}
		_ => demangled.as_str(),
	};
	strip_disambiguators(without_hash)
}

/// Removes `[0123abcd]` crate disambiguators ("std[8f3a..]::panicking").
fn strip_disambiguators(symbol: &str) -> String {
	let mut out = String::with_capacity(symbol.len());
	let mut rest = symbol;
	while let Some(open) = rest.find('[') {
		let (head, tail) = rest.split_at(open);
		out.push_str(head);
		match tail[1..].find(']') {
			Some(close)
				if close >= 4 && tail[1..=close].chars().all(|c| c.is_ascii_hexdigit()) =>
			{
				rest = &tail[close + 2..];
			}
			_ => {
				out.push('[');
				rest = &tail[1..];
			}
		}
	}
	out.push_str(rest);
	out
}

fn module_of(function: &str) -> Option<String> {
	// "<Type as Trait>::method" lives in Type's module.
	let path = match function.strip_prefix('<') {
		Some(inner) => inner.split_once(" as ").map_or(inner, |(ty, _)| ty),
		None => function,
	};
	let path = path.split("::<").next().unwrap_or(path);
	path.rfind("::").map(|idx| path[..idx].to_string())
}

fn split_location(location: &str) -> (String, Option<u32>) {
	// path:line:column, where the path itself may contain ':' on Windows.
	let mut parts = location.rsplitn(3, ':');
	let _column = parts.next();
	let line = parts.next().and_then(|l| l.parse().ok());
	match (line, parts.next()) {
		(Some(line), Some(file)) => (file.to_string(), Some(line)),
		_ => (location.to_string(), None),
	}
}
