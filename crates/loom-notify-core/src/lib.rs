// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom error notifier.
//!
//! This crate provides the shared, serializable types used by the
//! `loom-notify` SDK and by anything that receives its payloads: captured
//! events, breadcrumbs, session payloads, namespaced metadata and the
//! delivery parameters handed to a transport.
//!
//! # Overview
//!
//! - [`Event`] - one captured failure, with breadcrumbs, metadata and the
//!   session that was active when it was captured
//! - [`Breadcrumb`] - a timestamped entry leading up to a failure
//! - [`SessionPayload`] - the counters of a tracked session
//! - [`Metadata`] - `section -> key -> value` store with key redaction
//! - [`DeliveryParams`] - target URL and headers for one delivery call
//!
//! The wire conventions (header names, payload versions) are compatible with
//! the Bugsnag error-reporting and session APIs.

pub mod breadcrumb;
pub mod delivery;
pub mod error;
pub mod event;
pub mod metadata;
pub mod session;

pub use breadcrumb::{Breadcrumb, BreadcrumbType};
pub use delivery::{
	DeliveryParams, PayloadKind, HEADER_API_KEY, HEADER_PAYLOAD_VERSION, HEADER_SENT_AT,
};
pub use error::{CoreError, Result};
pub use event::{
	AppInfo, DeviceInfo, ErrorInfo, Event, EventId, EventSession, Frame, Severity, SeverityReason,
	ThreadInfo, User,
};
pub use metadata::{Metadata, REDACTED};
pub use session::{SessionId, SessionPayload};
