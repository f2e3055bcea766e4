// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background delivery for handled notifications and session payloads.
//!
//! Jobs are processed in order on a dedicated worker thread that runs a
//! current-thread tokio runtime. Transient failures are retried with
//! exponential backoff and jitter. Each job reports its outcome through a
//! [`DeliveryHandle`], which can be awaited or waited on synchronously.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use loom_notify_core::DeliveryParams;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delivery::{Delivery, DeliveryStatus};
use crate::error::{NotifySdkError, Result};
use crate::interceptor::suppress_reporting;

/// Backoff settings for [`DeliveryStatus::Failed`] outcomes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

impl RetryPolicy {
	/// Delay before retry number `retry` (zero-based).
	pub fn delay_for(&self, retry: u32) -> Duration {
		let exponential = self.base_delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
		let capped = exponential.min(self.max_delay.as_secs_f64());

		let delay = if self.jitter {
			capped * (0.5 + fastrand::f64())
		} else {
			capped
		};
		Duration::from_secs_f64(delay)
	}
}

/// Runs on the worker with the payload and its final outcome, before the
/// handle resolves.
pub type OnComplete = Box<dyn FnOnce(&[u8], &Result<()>) + Send>;

struct Job {
	payload: Arc<[u8]>,
	params: DeliveryParams,
	on_complete: Option<OnComplete>,
	reply: oneshot::Sender<Result<()>>,
}

/// Resolves to the outcome of one queued delivery.
#[must_use = "dropping the handle does not cancel the delivery"]
pub struct DeliveryHandle {
	rx: oneshot::Receiver<Result<()>>,
}

impl DeliveryHandle {
	fn resolved(result: Result<()>) -> Self {
		let (tx, rx) = oneshot::channel();
		let _ = tx.send(result);
		Self { rx }
	}

	/// A handle for a payload that was intentionally not sent.
	pub(crate) fn skipped() -> Self {
		Self::resolved(Ok(()))
	}

	pub(crate) fn failed(error: NotifySdkError) -> Self {
		Self::resolved(Err(error))
	}

	/// Blocks until the delivery finishes. Must not be called from async code.
	pub fn wait(self) -> Result<()> {
		self.rx.blocking_recv().unwrap_or(Err(NotifySdkError::Cancelled))
	}
}

impl Future for DeliveryHandle {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx)
			.poll(cx)
			.map(|received| received.unwrap_or(Err(NotifySdkError::Cancelled)))
	}
}

/// Ordered background delivery with retry.
pub struct DeliveryQueue {
	sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
	cancel: CancellationToken,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
	/// Starts the worker thread.
	pub fn start(delivery: Arc<dyn Delivery>, policy: RetryPolicy) -> Result<Self> {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_time()
			.build()?;
		let (sender, receiver) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();

		let worker_cancel = cancel.clone();
		let worker = std::thread::Builder::new()
			.name("loom-notify-delivery".to_string())
			.spawn(move || {
				suppress_reporting(|| {
					runtime.block_on(run_worker(receiver, delivery, policy, worker_cancel));
				});
				// Don't wait on a delivery call still stuck in the blocking pool.
				runtime.shutdown_background();
			})?;

		Ok(Self {
			sender: Mutex::new(Some(sender)),
			cancel,
			worker: Mutex::new(Some(worker)),
		})
	}

	/// Queues `payload` for delivery.
	///
	/// After [`shutdown`](Self::shutdown) the handle resolves immediately to
	/// [`NotifySdkError::ClientShutdown`].
	pub fn enqueue(&self, payload: Vec<u8>, params: DeliveryParams) -> DeliveryHandle {
		self.submit(payload, params, None)
	}

	/// Like [`enqueue`](Self::enqueue), running `on_complete` once the
	/// outcome is final. It is not run for jobs rejected after shutdown.
	pub fn enqueue_with_completion(
		&self,
		payload: Vec<u8>,
		params: DeliveryParams,
		on_complete: OnComplete,
	) -> DeliveryHandle {
		self.submit(payload, params, Some(on_complete))
	}

	fn submit(
		&self,
		payload: Vec<u8>,
		params: DeliveryParams,
		on_complete: Option<OnComplete>,
	) -> DeliveryHandle {
		let (reply, rx) = oneshot::channel();
		let job = Job {
			payload: payload.into(),
			params,
			on_complete,
			reply,
		};

		let sender = self.sender.lock();
		let Some(sender) = sender.as_ref() else {
			return DeliveryHandle::failed(NotifySdkError::ClientShutdown);
		};
		if sender.send(job).is_err() {
			return DeliveryHandle::failed(NotifySdkError::ClientShutdown);
		}
		DeliveryHandle { rx }
	}

	/// Stops accepting jobs and lets queued ones finish for up to `grace`.
	///
	/// Jobs still pending after that are cancelled and resolve to
	/// [`NotifySdkError::Cancelled`]. Returns `true` if the queue drained.
	pub fn shutdown(&self, grace: Duration) -> bool {
		drop(self.sender.lock().take());
		let Some(worker) = self.worker.lock().take() else {
			return true;
		};

		let deadline = Instant::now() + grace;
		while !worker.is_finished() && Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(5));
		}
		let drained = worker.is_finished();
		if !drained {
			warn!(grace_ms = grace.as_millis() as u64, "Cancelling undelivered payloads");
			self.cancel.cancel();
		}

		if worker.join().is_err() {
			warn!("Delivery worker panicked");
		}
		drained
	}

	pub fn is_shutdown(&self) -> bool {
		self.sender.lock().is_none()
	}
}

impl Drop for DeliveryQueue {
	fn drop(&mut self) {
		drop(self.sender.lock().take());
		self.cancel.cancel();
	}
}

async fn run_worker(
	mut receiver: mpsc::UnboundedReceiver<Job>,
	delivery: Arc<dyn Delivery>,
	policy: RetryPolicy,
	cancel: CancellationToken,
) {
	while let Some(mut job) = receiver.recv().await {
		let result = if cancel.is_cancelled() {
			Err(NotifySdkError::Cancelled)
		} else {
			deliver_with_retry(&delivery, &policy, &cancel, &job).await
		};
		if let Some(on_complete) = job.on_complete.take() {
			let payload = Arc::clone(&job.payload);
			let completed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
				suppress_reporting(|| on_complete(&payload[..], &result))
			}));
			if completed.is_err() {
				warn!(url = %job.params.url, "Delivery completion callback panicked");
			}
		}
		let _ = job.reply.send(result);
	}
	debug!("Delivery worker stopped");
}

async fn deliver_with_retry(
	delivery: &Arc<dyn Delivery>,
	policy: &RetryPolicy,
	cancel: &CancellationToken,
	job: &Job,
) -> Result<()> {
	let max_attempts = policy.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		attempt += 1;

		let delivery = Arc::clone(delivery);
		let payload = Arc::clone(&job.payload);
		let params = job.params.clone();
		let call = tokio::task::spawn_blocking(move || {
			suppress_reporting(|| delivery.deliver(&payload, &params))
		});

		let status = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(NotifySdkError::Cancelled),
			joined = call => joined.unwrap_or_else(|e| {
				warn!(error = %e, "Transport panicked");
				DeliveryStatus::Failed
			}),
		};

		match status {
			DeliveryStatus::Delivered => {
				debug!(url = %job.params.url, attempt, "Payload delivered");
				return Ok(());
			}
			DeliveryStatus::Undeliverable => {
				warn!(url = %job.params.url, attempt, "Payload rejected, not retrying");
				return Err(NotifySdkError::Delivery { status });
			}
			DeliveryStatus::Failed if attempt >= max_attempts => {
				warn!(
					url = %job.params.url,
					attempt,
					max_attempts,
					"Delivery attempts exhausted"
				);
				return Err(NotifySdkError::Delivery { status });
			}
			DeliveryStatus::Failed => {
				let delay = policy.delay_for(attempt - 1);
				debug!(
					url = %job.params.url,
					attempt,
					delay_ms = delay.as_millis() as u64,
					"Retrying delivery"
				);
				tokio::select! {
					biased;
					_ = cancel.cancelled() => return Err(NotifySdkError::Cancelled),
					_ = tokio::time::sleep(delay) => {}
				}
			}
		}
	}
}
