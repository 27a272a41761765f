// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coalescing of change notifications.
//!
//! Plugging a jack in often produces several port changes in quick
//! succession. Only the last one matters, so notifications are parked here
//! and a single dispatch runs once the event loop has nothing else to do.

/// Two-state coalescing slot: Idle, or Pending with the latest value.
#[derive(Debug)]
pub struct Debouncer<T> {
    latest: Option<T>,
    scheduled: bool,
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debouncer<T> {
    pub fn new() -> Self {
        Self {
            latest: None,
            scheduled: false,
        }
    }

    /// Record a notification.
    ///
    /// Returns `true` when this call moved the debouncer from Idle to
    /// Pending, i.e. the caller has to schedule the dispatch. While Pending
    /// the recorded value is only replaced.
    pub fn notify(&mut self, value: T) -> bool {
        self.latest = Some(value);
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.scheduled
    }

    /// Run the scheduled dispatch: hand out the latest value and go Idle.
    ///
    /// Returns `None` when nothing was pending.
    pub fn fire(&mut self) -> Option<T> {
        self.scheduled = false;
        self.latest.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_notification_schedules() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.is_pending());
        assert!(debouncer.notify("p1"));
        assert!(debouncer.is_pending());
    }

    #[test]
    fn test_burst_coalesces_to_last() {
        let mut debouncer = Debouncer::new();
        let scheduled: Vec<bool> = ["p1", "p2", "p3", "p4"]
            .into_iter()
            .map(|p| debouncer.notify(p))
            .collect();

        assert_eq!(scheduled, vec![true, false, false, false]);
        assert_eq!(debouncer.fire(), Some("p4"));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.fire(), None);
    }

    #[test]
    fn test_next_cycle_after_fire() {
        let mut debouncer = Debouncer::new();
        debouncer.notify(1);
        assert_eq!(debouncer.fire(), Some(1));

        assert!(debouncer.notify(2));
        assert_eq!(debouncer.fire(), Some(2));
    }
}
