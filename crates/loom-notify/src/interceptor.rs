// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Panic hook integration for automatic failure reporting.
//!
//! [`Interceptor`] owns the process panic hook while installed. The hook it
//! sets reports the panic through a [`FailureReporter`] and then always hands
//! the original [`PanicHookInfo`] to whichever hook was installed before it,
//! so default output and other crash handlers keep working.
//!
//! A thread-local guard stops a panic raised while reporting (or while user
//! callbacks run, or on the delivery worker) from being reported again.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_notify_core::ThreadInfo;
use parking_lot::Mutex;
use tracing::debug;

use crate::callbacks::panic_message;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

thread_local! {
	static REPORTING_SUPPRESSED: Cell<bool> = const { Cell::new(false) };
}

/// Runs `f` with panic reporting disabled on the current thread.
///
/// Restores the previous state afterwards, including when `f` unwinds.
pub(crate) fn suppress_reporting<R>(f: impl FnOnce() -> R) -> R {
	struct Restore(bool);

	impl Drop for Restore {
		fn drop(&mut self) {
			REPORTING_SUPPRESSED.with(|flag| flag.set(self.0));
		}
	}

	let _restore = Restore(REPORTING_SUPPRESSED.with(|flag| flag.replace(true)));
	f()
}

pub(crate) fn reporting_suppressed() -> bool {
	REPORTING_SUPPRESSED.with(Cell::get)
}

/// What the hook knows about a panic.
pub struct UnhandledFailure {
	pub message: String,
	/// `file:line:column` of the panic, when the runtime provides it.
	pub location: Option<String>,
	pub thread: ThreadInfo,
	pub backtrace: Backtrace,
}

impl UnhandledFailure {
	fn from_hook(info: &PanicHookInfo<'_>) -> Self {
		Self {
			message: panic_message(info.payload()),
			location: info
				.location()
				.map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
			thread: ThreadInfo::current(true),
			backtrace: Backtrace::force_capture(),
		}
	}
}

impl fmt::Debug for UnhandledFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UnhandledFailure")
			.field("message", &self.message)
			.field("location", &self.location)
			.field("thread", &self.thread)
			.finish_non_exhaustive()
	}
}

/// Receives panics caught by an installed [`Interceptor`].
///
/// Runs on the panicking thread. Implementations must not block on locks the
/// panicking code might hold, and any error must be handled internally.
pub trait FailureReporter: Send + Sync {
	fn report_unhandled(&self, failure: &UnhandledFailure);
}

#[derive(Default)]
struct InstallState {
	/// Heap address of the hook we set, used as its identity.
	hook_addr: Option<usize>,
	previous: Option<Arc<PanicHook>>,
}

/// Process-scoped owner of the panic hook.
///
/// Installing and uninstalling are explicit so tests can save and restore the
/// process hook deterministically.
pub struct Interceptor {
	reporter: Arc<dyn FailureReporter>,
	enabled: Arc<AtomicBool>,
	state: Mutex<InstallState>,
}

impl Interceptor {
	pub fn new(reporter: Arc<dyn FailureReporter>) -> Self {
		Self {
			reporter,
			enabled: Arc::new(AtomicBool::new(false)),
			state: Mutex::new(InstallState::default()),
		}
	}

	/// Makes this interceptor the process panic hook.
	///
	/// Returns `false` if it already was; the previous hook is then kept as
	/// captured the first time. Must not be called while panicking.
	pub fn install(&self) -> bool {
		let mut state = self.state.lock();
		let current = panic::take_hook();

		if state.hook_addr == Some(hook_addr(&current)) {
			panic::set_hook(current);
			self.enabled.store(true, Ordering::Release);
			return false;
		}

		let previous = Arc::new(current);
		let hook = self.make_hook(Arc::clone(&previous));
		state.hook_addr = Some(hook_addr(&hook));
		state.previous = Some(previous);

		self.enabled.store(true, Ordering::Release);
		panic::set_hook(hook);
		debug!("Panic hook installed");
		true
	}

	/// Removes this interceptor from the panic hook chain.
	///
	/// If our hook is still the current one, the previous hook is restored.
	/// If something has been installed on top of it since, the chain is left
	/// alone and our hook just passes panics through. Returns `false` if the
	/// interceptor was not installed. Must not be called while panicking.
	pub fn uninstall(&self) -> bool {
		let mut state = self.state.lock();
		let Some(addr) = state.hook_addr.take() else {
			return false;
		};
		let previous = state.previous.take();
		self.enabled.store(false, Ordering::Release);

		let current = panic::take_hook();
		if hook_addr(&current) != addr {
			panic::set_hook(current);
			debug!("Panic hook displaced, leaving it as a pass-through");
			return true;
		}

		// Dropping our hook releases its handle on the previous one.
		drop(current);
		match previous.map(Arc::try_unwrap) {
			Some(Ok(hook)) => panic::set_hook(hook),
			Some(Err(shared)) => panic::set_hook(Box::new(move |info| shared(info))),
			None => {}
		}
		debug!("Panic hook uninstalled");
		true
	}

	/// Whether the current process panic hook is this interceptor's.
	pub fn is_installed(&self) -> bool {
		let state = self.state.lock();
		let Some(addr) = state.hook_addr else {
			return false;
		};
		let current = panic::take_hook();
		let installed = hook_addr(&current) == addr;
		panic::set_hook(current);
		installed
	}

	fn make_hook(&self, previous: Arc<PanicHook>) -> PanicHook {
		let reporter = Arc::clone(&self.reporter);
		let enabled = Arc::clone(&self.enabled);

		Box::new(move |info| {
			let report = enabled.load(Ordering::Acquire) && !reporting_suppressed();
			// Hooks further down the chain see the guard too, so a panic is
			// reported at most once however many interceptors are stacked.
			suppress_reporting(|| {
				if report {
					reporter.report_unhandled(&UnhandledFailure::from_hook(info));
				}
				previous(info);
			});
		})
	}
}

impl Drop for Interceptor {
	fn drop(&mut self) {
		if !std::thread::panicking() {
			self.uninstall();
		}
	}
}

fn hook_addr(hook: &PanicHook) -> usize {
	&**hook as *const (dyn Fn(&PanicHookInfo<'_>) + Sync + Send) as *const () as usize
}

/// Serializes tests that replace the process panic hook.
#[cfg(test)]
pub(crate) static HOOK_LOCK: Mutex<()> = parking_lot::const_mutex(());
