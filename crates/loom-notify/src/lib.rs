// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error notifier SDK for Rust applications.
//!
//! Captures panics and handled errors, attaches breadcrumbs, metadata and the
//! active session, runs user callbacks over them and hands the result to a
//! pluggable transport. Payloads follow the Bugsnag delivery protocol.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use loom_notify::{Client, Configuration, Event, HttpDelivery, DEFAULT_SHUTDOWN_GRACE};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Configuration::from_env()?;
//!     config.app_version = Some(env!("CARGO_PKG_VERSION").to_string());
//!     config.redact_keys = vec!["password".to_string()];
//!     config.set_delivery(Arc::new(HttpDelivery::new()));
//!
//!     // Drop events from a noisy dependency
//!     config.add_on_error(Arc::new(|event: &mut Event| {
//!         !event.error.message.contains("connection reset")
//!     }));
//!
//!     // Installs the panic hook and starts a session
//!     let client = Client::start(&config)?;
//!     client.leave_breadcrumb("Application started");
//!
//!     if let Err(e) = risky_operation() {
//!         client.notify_blocking(&e)?;
//!     }
//!
//!     client.shutdown(DEFAULT_SHUTDOWN_GRACE);
//!     Ok(())
//! }
//!
//! fn risky_operation() -> Result<(), std::io::Error> {
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Panic Interceptor**: Reports panics synchronously, then always runs the
//!   previously installed panic hook
//! - **Callbacks**: Ordered, vetoable callbacks for events, breadcrumbs and sessions
//! - **Sessions**: Handled and unhandled counts per session for stability metrics
//! - **Breadcrumbs**: A bounded trail of what happened before a failure
//! - **Background Delivery**: Handled errors are retried with backoff off the calling thread
//! - **Offline Store**: Events that fail to send are kept on disk and retried on the next start
//! - **Device Data**: OS, architecture, locale and memory figures on every event
//! - **Redaction**: Metadata values under sensitive keys are replaced before sending

mod backtrace;
mod breadcrumbs;
mod callbacks;
mod client;
mod config;
mod delivery;
mod device;
mod error;
mod interceptor;
mod queue;
mod session;
mod snapshot;
mod store;

pub use breadcrumbs::BreadcrumbState;
pub use callbacks::{Callback, CallbackRegistry, OnBreadcrumb, OnError, OnSession};
pub use client::{Client, DEFAULT_SHUTDOWN_GRACE, PANIC_ERROR_CLASS};
pub use config::{
	ConfigError, Configuration, Endpoints, DEFAULT_LAUNCH_CRASH_THRESHOLD_MS,
	DEFAULT_MAX_BREADCRUMBS, DEFAULT_MAX_PERSISTED_EVENTS, DEFAULT_NOTIFY_ENDPOINT,
	DEFAULT_SESSIONS_ENDPOINT,
};
pub use delivery::{
	delivery_params, status_for, Delivery, DeliveryStatus, HttpDelivery, DEFAULT_DELIVERY_TIMEOUT,
};
pub use error::{NotifySdkError, Result};
pub use interceptor::{FailureReporter, Interceptor, UnhandledFailure};
pub use queue::{DeliveryHandle, DeliveryQueue, OnComplete, RetryPolicy};
pub use session::{Session, SessionTracker};
pub use snapshot::{ConfigSnapshot, MAX_BREADCRUMB_CAPACITY};
pub use store::PayloadStore;

pub use loom_notify_core::{
	AppInfo, Breadcrumb, BreadcrumbType, DeliveryParams, DeviceInfo, ErrorInfo, Event, EventId,
	EventSession, Frame, Metadata, PayloadKind, SessionId, SessionPayload, Severity, SeverityReason,
	ThreadInfo, User, HEADER_API_KEY, HEADER_PAYLOAD_VERSION, HEADER_SENT_AT, REDACTED,
};
