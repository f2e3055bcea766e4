// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end behaviour of the notifier through its public API.

use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_notify::{
	Client, ConfigSnapshot, Configuration, Delivery, DeliveryParams, DeliveryStatus, Event,
	HttpDelivery, SessionPayload, HEADER_API_KEY, HEADER_PAYLOAD_VERSION,
};
use parking_lot::Mutex;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Tests in this file replace the process panic hook.
static HOOK_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[derive(Default)]
struct CountingDelivery {
	errors: AtomicUsize,
	sessions: Mutex<Vec<SessionPayload>>,
}

impl Delivery for CountingDelivery {
	fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus {
		if params.url.contains("sessions") {
			if let Ok(session) = serde_json::from_slice(payload) {
				self.sessions.lock().push(session);
			}
		} else {
			self.errors.fetch_add(1, Ordering::SeqCst);
		}
		DeliveryStatus::Delivered
	}
}

fn seeded(delivery: &Arc<CountingDelivery>) -> Configuration {
	let mut config = Configuration::new("k1");
	config.set_delivery(delivery.clone());
	config
}

#[test]
fn breadcrumb_capacity_is_clamped_at_snapshot() {
	let delivery = Arc::new(CountingDelivery::default());

	let mut config = seeded(&delivery);
	config.max_breadcrumbs = 37;
	assert_eq!(ConfigSnapshot::build(&config).unwrap().max_breadcrumbs(), 37);

	let mut config = seeded(&delivery);
	config.max_breadcrumbs = -5;
	assert_eq!(ConfigSnapshot::build(&config).unwrap().max_breadcrumbs(), 0);
}

#[test]
fn vetoed_panic_reaches_previous_hook_only() {
	let _guard = HOOK_LOCK.lock();

	let original = panic::take_hook();
	let previous_calls = Arc::new(AtomicUsize::new(0));
	let counter = previous_calls.clone();
	panic::set_hook(Box::new(move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
	}));

	let delivery = Arc::new(CountingDelivery::default());
	let mut config = seeded(&delivery);
	config.auto_track_sessions = false;
	let client = Client::start(&config).unwrap();
	assert!(client.interceptor().is_installed());

	// Session lifecycle: start, stop, resume, start again.
	let a = client.start_session().unwrap();
	client.stop_session().unwrap().wait().unwrap();
	assert_eq!(client.resume_session(), Some(a));
	client.stop_session().unwrap().wait().unwrap();
	let b = client.start_session().unwrap();
	assert_ne!(a, b);
	assert_eq!(delivery.sessions.lock().len(), 2);
	assert!(delivery.sessions.lock().iter().all(|s| s.id == a));

	client.snapshot().callbacks().add_on_error(Arc::new(|_: &mut Event| false));
	let result = std::thread::spawn(|| panic!("scenario failure")).join();

	client.interceptor().uninstall();
	panic::set_hook(original);

	assert!(result.is_err());
	assert_eq!(delivery.errors.load(Ordering::SeqCst), 0);
	assert_eq!(previous_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn panic_is_delivered_and_counted() {
	let _guard = HOOK_LOCK.lock();

	let original = panic::take_hook();
	panic::set_hook(Box::new(|_| {}));

	let delivery = Arc::new(CountingDelivery::default());
	let client = Client::start(&seeded(&delivery)).unwrap();
	let session = client.current_session().unwrap();

	let _ = std::thread::spawn(|| panic!("delivered failure")).join();
	// Caught panics are still unhandled from the hook's point of view.
	let _ = panic::catch_unwind(|| panic!("caught failure"));

	client.interceptor().uninstall();
	panic::set_hook(original);

	assert_eq!(delivery.errors.load(Ordering::SeqCst), 2);
	assert!(client.shutdown(Duration::from_secs(2)));
	let sessions = delivery.sessions.lock();
	assert_eq!(sessions.len(), 1);
	assert_eq!(sessions[0].id, session);
	assert_eq!(sessions[0].unhandled_count, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn handled_error_is_posted_over_http() {
	let mock_server = MockServer::start().await;

	Mock::given(matchers::method("POST"))
		.and(matchers::path("/notify"))
		.and(matchers::header(HEADER_API_KEY, "k1"))
		.and(matchers::header(HEADER_PAYLOAD_VERSION, "4.0"))
		.respond_with(ResponseTemplate::new(202))
		.expect(1)
		.mount(&mock_server)
		.await;
	Mock::given(matchers::method("POST"))
		.and(matchers::path("/sessions"))
		.and(matchers::header(HEADER_PAYLOAD_VERSION, "1.0"))
		.respond_with(ResponseTemplate::new(202))
		.expect(1)
		.mount(&mock_server)
		.await;

	let mut config = Configuration::new("k1");
	config.auto_detect_errors = false;
	config.endpoints.notify = format!("{}/notify", mock_server.uri());
	config.endpoints.sessions = format!("{}/sessions", mock_server.uri());
	config.set_delivery(Arc::new(HttpDelivery::new()));

	let client = Client::start(&config).unwrap();
	let error = std::io::Error::other("disk full");
	client.notify(&error).await.unwrap();

	let drained = tokio::task::spawn_blocking(move || client.shutdown(Duration::from_secs(5)))
		.await
		.unwrap();
	assert!(drained);
}
