// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: report a handled error and a panic with the loom-notify SDK.
//!
//! Run with:
//!   LOOM_NOTIFY_API_KEY=... cargo run --example capture -p loom-notify

use std::sync::Arc;

use loom_notify::{
	BreadcrumbType, Client, Configuration, Event, HttpDelivery, Severity, User,
	DEFAULT_SHUTDOWN_GRACE,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| "loom_notify=debug".into()),
		)
		.init();

	let mut config = Configuration::from_env()?;
	config.app_version = Some(env!("CARGO_PKG_VERSION").to_string());
	config.release_stage.get_or_insert_with(|| "development".to_string());
	config.project_packages = vec!["capture".to_string()];
	config.redact_keys = vec!["password".to_string()];
	config
		.persistence_directory
		.get_or_insert_with(|| std::env::temp_dir().join("loom-notify-capture"));
	config.set_delivery(Arc::new(HttpDelivery::new()));

	println!("Starting notifier...");
	println!("  Notify endpoint: {}", config.endpoints.notify);
	println!("  Sessions endpoint: {}", config.endpoints.sessions);
	if let Some(dir) = &config.persistence_directory {
		println!("  Undelivered events kept in: {}", dir.display());
	}

	let client = Client::start(&config)?;

	client.set_user(User {
		id: Some("user_example_123".to_string()),
		email: Some("example@example.com".to_string()),
		name: Some("Example User".to_string()),
	});
	client.add_metadata("account", "plan", json!("free"));
	client.add_metadata("account", "password", json!("hunter2"));

	client.leave_breadcrumb("Application started");
	let mut request = serde_json::Map::new();
	request.insert("path".to_string(), json!("/api/data"));
	client.leave_breadcrumb_with(BreadcrumbType::Request, "GET /api/data failed", request);
	client.mark_launch_completed();

	println!("\nReporting handled error...");
	let error = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml missing");
	client.notify_blocking(&error)?;

	println!("Reporting warning...");
	let handle = client.notify_with(&error, |event: &mut Event| {
		event.set_severity(Severity::Warning);
		event.context = Some("settings".to_string());
		true
	});
	handle.wait()?;

	println!("Triggering a panic on a worker thread...");
	let _ = std::thread::spawn(|| panic!("example worker failure")).join();

	let drained = client.shutdown(DEFAULT_SHUTDOWN_GRACE);
	println!("\nShutdown complete (drained: {drained})");
	Ok(())
}
