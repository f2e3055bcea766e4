// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transport abstraction, delivery parameters and the default HTTP transport.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use loom_notify_core::{
	DeliveryParams, PayloadKind, HEADER_API_KEY, HEADER_PAYLOAD_VERSION, HEADER_SENT_AT,
};
use tracing::{debug, warn};

use crate::interceptor::suppress_reporting;
use crate::snapshot::ConfigSnapshot;

/// Default time allowed for one HTTP delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
	/// The server accepted the payload.
	Delivered,
	/// The server rejected the payload; retrying will not help.
	Undeliverable,
	/// A transient failure; the payload may be retried.
	Failed,
}

/// A transport that sends serialized payloads.
///
/// Called on the panicking thread for unhandled failures, so implementations
/// must return within a bounded time.
pub trait Delivery: Send + Sync {
	fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus;
}

static LAST_SENT_AT_MS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Builds the URL and headers for delivering a payload of `kind`.
///
/// Exactly three headers are set. The sent-at value never repeats within the
/// process: if the clock has not advanced past the previous value it is
/// bumped by one millisecond.
pub fn delivery_params(snapshot: &ConfigSnapshot, kind: PayloadKind) -> DeliveryParams {
	let url = match kind {
		PayloadKind::Error => snapshot.endpoints().notify.clone(),
		PayloadKind::Session => snapshot.endpoints().sessions.clone(),
	};

	let headers = [
		(HEADER_API_KEY, snapshot.api_key().to_string()),
		(HEADER_SENT_AT, sent_at()),
		(HEADER_PAYLOAD_VERSION, kind.payload_version().to_string()),
	]
	.into_iter()
	.map(|(name, value)| (name.to_string(), value))
	.collect();

	DeliveryParams { url, headers }
}

fn sent_at() -> String {
	let now = Utc::now().timestamp_millis();
	let mut last = LAST_SENT_AT_MS.load(Ordering::Relaxed);
	let millis = loop {
		let next = now.max(last.saturating_add(1));
		match LAST_SENT_AT_MS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
		{
			Ok(_) => break next,
			Err(actual) => last = actual,
		}
	};

	DateTime::<Utc>::from_timestamp_millis(millis)
		.unwrap_or_else(Utc::now)
		.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Maps an HTTP status code to a delivery outcome.
pub fn status_for(code: u16) -> DeliveryStatus {
	match code {
		200..=299 => DeliveryStatus::Delivered,
		408 | 429 => DeliveryStatus::Failed,
		400..=499 => DeliveryStatus::Undeliverable,
		_ => DeliveryStatus::Failed,
	}
}

/// Default transport: a JSON `POST` with a bounded wait.
///
/// Each call runs on a short-lived thread so a stalled connection can never
/// hold the caller past the timeout.
#[derive(Debug, Clone)]
pub struct HttpDelivery {
	timeout: Duration,
}

impl HttpDelivery {
	pub fn new() -> Self {
		Self::with_timeout(DEFAULT_DELIVERY_TIMEOUT)
	}

	pub fn with_timeout(timeout: Duration) -> Self {
		Self { timeout }
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}

impl Default for HttpDelivery {
	fn default() -> Self {
		Self::new()
	}
}

impl Delivery for HttpDelivery {
	fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus {
		let (tx, rx) = mpsc::sync_channel(1);
		let body = payload.to_vec();
		let params = params.clone();
		let timeout = self.timeout;

		let spawned = std::thread::Builder::new()
			.name("loom-notify-http".to_string())
			.spawn(move || {
				let status = suppress_reporting(|| post(&body, &params, timeout));
				let _ = tx.send(status);
			});
		if let Err(e) = spawned {
			warn!(error = %e, "Failed to spawn delivery thread");
			return DeliveryStatus::Failed;
		}

		// Small grace period over the request timeout for connection teardown.
		match rx.recv_timeout(timeout + Duration::from_millis(250)) {
			Ok(status) => status,
			Err(_) => {
				warn!(timeout_ms = timeout.as_millis() as u64, "Delivery timed out");
				DeliveryStatus::Failed
			}
		}
	}
}

fn post(body: &[u8], params: &DeliveryParams, timeout: Duration) -> DeliveryStatus {
	let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
		Ok(client) => client,
		Err(e) => {
			warn!(error = %e, "Failed to build HTTP client");
			return DeliveryStatus::Failed;
		}
	};

	let mut request = client
		.post(&params.url)
		.header(reqwest::header::CONTENT_TYPE, "application/json")
		.body(body.to_vec());
	for (name, value) in &params.headers {
		request = request.header(name.as_str(), value.as_str());
	}

	match request.send() {
		Ok(response) => {
			let code = response.status().as_u16();
			let status = status_for(code);
			debug!(url = %params.url, status = code, outcome = ?status, "Delivery attempt finished");
			status
		}
		Err(e) => {
			warn!(url = %params.url, error = %e, "Delivery request failed");
			DeliveryStatus::Failed
		}
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use super::*;
	use parking_lot::Mutex;
	use std::collections::VecDeque;

	/// Records every call and answers from a script, then with a fallback.
	pub(crate) struct RecordingDelivery {
		calls: Mutex<Vec<(Vec<u8>, DeliveryParams)>>,
		script: Mutex<VecDeque<DeliveryStatus>>,
		fallback: DeliveryStatus,
	}

	impl RecordingDelivery {
		pub(crate) fn new(fallback: DeliveryStatus) -> Self {
			Self {
				calls: Mutex::new(Vec::new()),
				script: Mutex::new(VecDeque::new()),
				fallback,
			}
		}

		pub(crate) fn scripted(statuses: impl IntoIterator<Item = DeliveryStatus>) -> Self {
			let delivery = Self::new(DeliveryStatus::Delivered);
			delivery.script.lock().extend(statuses);
			delivery
		}

		pub(crate) fn call_count(&self) -> usize {
			self.calls.lock().len()
		}

		pub(crate) fn calls(&self) -> Vec<(Vec<u8>, DeliveryParams)> {
			self.calls.lock().clone()
		}
	}

	impl Delivery for RecordingDelivery {
		fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus {
			self.calls.lock().push((payload.to_vec(), params.clone()));
			self.script.lock().pop_front().unwrap_or(self.fallback)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::testing::RecordingDelivery;
	use super::*;
	use crate::config::{Configuration, Endpoints};
	use std::sync::Arc;
	use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

	fn snapshot() -> Arc<ConfigSnapshot> {
		let mut config = Configuration::new("k1");
		config.endpoints = Endpoints::new("https://notify.test", "https://sessions.test");
		config.set_delivery(Arc::new(RecordingDelivery::new(DeliveryStatus::Delivered)));
		ConfigSnapshot::build(&config).unwrap()
	}

	fn params_for(url: String) -> DeliveryParams {
		DeliveryParams {
			url,
			headers: [(HEADER_API_KEY.to_string(), "k1".to_string())].into(),
		}
	}

	#[test]
	fn params_have_exactly_three_headers() {
		let snapshot = snapshot();
		for kind in [PayloadKind::Error, PayloadKind::Session] {
			let params = delivery_params(&snapshot, kind);
			let mut names: Vec<_> = params.headers.keys().map(String::as_str).collect();
			names.sort_unstable();
			let mut expected = vec![HEADER_API_KEY, HEADER_PAYLOAD_VERSION, HEADER_SENT_AT];
			expected.sort_unstable();
			assert_eq!(names, expected);
			assert_eq!(params.header(HEADER_API_KEY), Some("k1"));
			assert_eq!(params.header(HEADER_PAYLOAD_VERSION), Some(kind.payload_version()));
		}
	}

	#[test]
	fn params_route_by_kind() {
		let snapshot = snapshot();
		assert_eq!(delivery_params(&snapshot, PayloadKind::Error).url, "https://notify.test");
		assert_eq!(
			delivery_params(&snapshot, PayloadKind::Session).url,
			"https://sessions.test"
		);
	}

	#[test]
	fn sequential_params_differ_only_in_timestamp() {
		let snapshot = snapshot();
		let first = delivery_params(&snapshot, PayloadKind::Error);
		let second = delivery_params(&snapshot, PayloadKind::Error);

		assert_ne!(first.header(HEADER_SENT_AT), second.header(HEADER_SENT_AT));
		assert_eq!(first.header(HEADER_API_KEY), second.header(HEADER_API_KEY));
		assert_eq!(
			first.header(HEADER_PAYLOAD_VERSION),
			second.header(HEADER_PAYLOAD_VERSION)
		);
		assert_eq!(first.url, second.url);
	}

	#[test]
	fn sent_at_is_rfc3339_with_millis_and_increasing() {
		let stamps: Vec<_> = (0..50).map(|_| sent_at()).collect();
		let parsed: Vec<_> = stamps
			.iter()
			.map(|s| DateTime::parse_from_rfc3339(s).unwrap())
			.collect();
		assert!(parsed.windows(2).all(|pair| pair[0] < pair[1]));
		assert!(stamps.iter().all(|s| s.ends_with('Z') && s.len() == 24));
	}

	#[test]
	fn status_mapping() {
		assert_eq!(status_for(200), DeliveryStatus::Delivered);
		assert_eq!(status_for(202), DeliveryStatus::Delivered);
		assert_eq!(status_for(400), DeliveryStatus::Undeliverable);
		assert_eq!(status_for(401), DeliveryStatus::Undeliverable);
		assert_eq!(status_for(408), DeliveryStatus::Failed);
		assert_eq!(status_for(429), DeliveryStatus::Failed);
		assert_eq!(status_for(500), DeliveryStatus::Failed);
		assert_eq!(status_for(503), DeliveryStatus::Failed);
		assert_eq!(status_for(301), DeliveryStatus::Failed);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn http_delivery_posts_json_with_headers() {
		let mock_server = MockServer::start().await;

		Mock::given(matchers::method("POST"))
			.and(matchers::path("/notify"))
			.and(matchers::header(HEADER_API_KEY, "k1"))
			.and(matchers::header("content-type", "application/json"))
			.and(matchers::body_string("{\"ok\":true}"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&mock_server)
			.await;

		let params = params_for(format!("{}/notify", mock_server.uri()));
		let status = tokio::task::spawn_blocking(move || {
			HttpDelivery::new().deliver(b"{\"ok\":true}", &params)
		})
		.await
		.unwrap();

		assert_eq!(status, DeliveryStatus::Delivered);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn http_delivery_maps_client_and_server_errors() {
		let mock_server = MockServer::start().await;

		Mock::given(matchers::method("POST"))
			.and(matchers::path("/bad-request"))
			.respond_with(ResponseTemplate::new(400))
			.mount(&mock_server)
			.await;
		Mock::given(matchers::method("POST"))
			.and(matchers::path("/rate-limited"))
			.respond_with(ResponseTemplate::new(429))
			.mount(&mock_server)
			.await;
		Mock::given(matchers::method("POST"))
			.and(matchers::path("/unavailable"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&mock_server)
			.await;

		let uri = mock_server.uri();
		let statuses = tokio::task::spawn_blocking(move || {
			let delivery = HttpDelivery::new();
			["bad-request", "rate-limited", "unavailable"]
				.map(|path| delivery.deliver(b"{}", &params_for(format!("{uri}/{path}"))))
		})
		.await
		.unwrap();

		assert_eq!(
			statuses,
			[
				DeliveryStatus::Undeliverable,
				DeliveryStatus::Failed,
				DeliveryStatus::Failed,
			]
		);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn http_delivery_times_out() {
		let mock_server = MockServer::start().await;

		Mock::given(matchers::method("POST"))
			.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
			.mount(&mock_server)
			.await;

		let params = params_for(format!("{}/slow", mock_server.uri()));
		let status = tokio::task::spawn_blocking(move || {
			HttpDelivery::with_timeout(Duration::from_millis(100)).deliver(b"{}", &params)
		})
		.await
		.unwrap();

		assert_eq!(status, DeliveryStatus::Failed);
	}

	#[test]
	fn unreachable_endpoint_is_a_transient_failure() {
		let params = params_for("http://127.0.0.1:9/notify".to_string());
		let status = HttpDelivery::with_timeout(Duration::from_millis(500)).deliver(b"{}", &params);
		assert_eq!(status, DeliveryStatus::Failed);
	}
}
