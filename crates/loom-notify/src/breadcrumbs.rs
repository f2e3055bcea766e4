// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded breadcrumb history attached to every event.

use std::collections::VecDeque;
use std::sync::Arc;

use loom_notify_core::Breadcrumb;
use parking_lot::Mutex;
use tracing::trace;

use crate::snapshot::ConfigSnapshot;

/// Ring of the most recent breadcrumbs; the oldest is evicted first.
pub struct BreadcrumbState {
	snapshot: Arc<ConfigSnapshot>,
	ring: Mutex<VecDeque<Breadcrumb>>,
}

impl BreadcrumbState {
	pub fn new(snapshot: Arc<ConfigSnapshot>) -> Self {
		let capacity = snapshot.max_breadcrumbs();
		Self {
			snapshot,
			ring: Mutex::new(VecDeque::with_capacity(capacity)),
		}
	}

	pub fn capacity(&self) -> usize {
		self.snapshot.max_breadcrumbs()
	}

	/// Records a breadcrumb left explicitly by the application.
	///
	/// Runs the breadcrumb callbacks; returns `false` if the breadcrumb was
	/// vetoed or the ring has no capacity.
	pub fn leave(&self, breadcrumb: Breadcrumb) -> bool {
		self.record(breadcrumb)
	}

	/// Records a breadcrumb generated by the notifier itself. These are
	/// additionally filtered by the enabled breadcrumb types.
	pub fn leave_automatic(&self, breadcrumb: Breadcrumb) -> bool {
		if !self
			.snapshot
			.should_record_breadcrumb_type(breadcrumb.breadcrumb_type)
		{
			trace!(breadcrumb_type = %breadcrumb.breadcrumb_type, "Breadcrumb type disabled");
			return false;
		}
		self.record(breadcrumb)
	}

	fn record(&self, mut breadcrumb: Breadcrumb) -> bool {
		let capacity = self.capacity();
		if capacity == 0 {
			return false;
		}
		if !self.snapshot.callbacks().run_on_breadcrumb(&mut breadcrumb) {
			return false;
		}

		let mut ring = self.ring.lock();
		while ring.len() >= capacity {
			ring.pop_front();
		}
		ring.push_back(breadcrumb);
		true
	}

	/// Oldest-first copy of the ring.
	pub fn snapshot(&self) -> Vec<Breadcrumb> {
		self.ring.lock().iter().cloned().collect()
	}

	/// Crash-time copy that never blocks; empty if the ring is being written.
	pub(crate) fn try_snapshot(&self) -> Vec<Breadcrumb> {
		self.ring
			.try_lock()
			.map(|ring| ring.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn len(&self) -> usize {
		self.ring.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.ring.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callbacks::OnBreadcrumb;
	use crate::snapshot::test_snapshot;
	use loom_notify_core::BreadcrumbType;
	use proptest::prelude::*;

	fn messages(state: &BreadcrumbState) -> Vec<String> {
		state.snapshot().into_iter().map(|b| b.message).collect()
	}

	#[test]
	fn evicts_oldest_first() {
		let state = BreadcrumbState::new(test_snapshot(|c| c.max_breadcrumbs = 3));
		for i in 0..5 {
			assert!(state.leave(Breadcrumb::manual(format!("crumb-{i}"))));
		}
		assert_eq!(messages(&state), ["crumb-2", "crumb-3", "crumb-4"]);
	}

	#[test]
	fn zero_capacity_records_nothing() {
		let state = BreadcrumbState::new(test_snapshot(|c| c.max_breadcrumbs = -5));
		assert_eq!(state.capacity(), 0);
		assert!(!state.leave(Breadcrumb::manual("dropped")));
		assert!(state.is_empty());
	}

	#[test]
	fn vetoed_breadcrumb_is_dropped_alone() {
		let snapshot = test_snapshot(|c| {
			let veto: OnBreadcrumb =
				Arc::new(|crumb: &mut Breadcrumb| !crumb.message.contains("secret"));
			c.add_on_breadcrumb(veto);
		});
		let state = BreadcrumbState::new(snapshot);

		assert!(state.leave(Breadcrumb::manual("before")));
		assert!(!state.leave(Breadcrumb::manual("secret token")));
		assert!(state.leave_automatic(Breadcrumb::new(BreadcrumbType::Error, "after")));
		assert_eq!(messages(&state), ["before", "after"]);
	}

	#[test]
	fn callbacks_can_edit_breadcrumbs() {
		let snapshot = test_snapshot(|c| {
			c.add_on_breadcrumb(Arc::new(|crumb: &mut Breadcrumb| {
				crumb.message = crumb.message.to_uppercase();
				true
			}));
		});
		let state = BreadcrumbState::new(snapshot);
		state.leave(Breadcrumb::manual("quiet"));
		assert_eq!(messages(&state), ["QUIET"]);
	}

	#[test]
	fn automatic_breadcrumbs_respect_enabled_types() {
		let state = BreadcrumbState::new(test_snapshot(|c| {
			c.enabled_breadcrumb_types = vec![BreadcrumbType::Log];
		}));

		assert!(!state.leave_automatic(Breadcrumb::new(BreadcrumbType::Error, "auto")));
		assert!(state.leave_automatic(Breadcrumb::new(BreadcrumbType::Log, "log")));
		assert!(state.leave(Breadcrumb::new(BreadcrumbType::Navigation, "manual nav")));
		assert_eq!(messages(&state), ["log", "manual nav"]);
	}

	#[test]
	fn try_snapshot_does_not_block() {
		let state = BreadcrumbState::new(test_snapshot(|_| {}));
		state.leave(Breadcrumb::manual("one"));
		assert_eq!(state.try_snapshot().len(), 1);

		let _held = state.ring.lock();
		assert!(state.try_snapshot().is_empty());
	}

	#[test]
	fn clear_empties_ring() {
		let state = BreadcrumbState::new(test_snapshot(|_| {}));
		state.leave(Breadcrumb::manual("one"));
		state.clear();
		assert!(state.is_empty());
	}

	proptest! {
		#[test]
		fn ring_keeps_latest_up_to_capacity(capacity in 0i64..20, count in 0usize..60) {
			let state = BreadcrumbState::new(test_snapshot(|c| c.max_breadcrumbs = capacity));
			for i in 0..count {
				state.leave(Breadcrumb::manual(i.to_string()));
			}

			let kept = messages(&state);
			let expected_len = count.min(capacity as usize);
			prop_assert_eq!(kept.len(), expected_len);
			let expected: Vec<String> = (count - expected_len..count).map(|i| i.to_string()).collect();
			prop_assert_eq!(kept, expected);
		}
	}
}
