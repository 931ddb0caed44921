// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A resettable latch marking the accept loop (including its drain) as finished.
pub(crate) struct Completion {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn reset(&self) {
        *lock(&self.done) = false;
    }

    pub(crate) fn finish(&self) {
        *lock(&self.done) = true;
        self.cv.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        *lock(&self.done)
    }

    pub(crate) fn wait(&self) {
        let mut done = lock(&self.done);
        while !*done {
            done = self.cv.wait(done).unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// Counts connection threads that have been dispatched and not yet finished.
pub(crate) struct InFlight {
    count: Mutex<usize>,
    cv: Condvar,
}

pub(crate) struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn count(&self) -> usize {
        *lock(&self.count)
    }

    pub(crate) fn enter(&self) {
        *lock(&self.count) += 1;
    }

    pub(crate) fn leave(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    /// Tie a `leave` to the lifetime of the returned guard.
    pub(crate) fn guard(&self) -> InFlightGuard<'_> {
        InFlightGuard { in_flight: self }
    }

    /// Wait until nothing is in flight. Returns false if `timeout` elapsed first.
    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut count = lock(&self.count);
        while *count > 0 {
            match deadline {
                None => count = self.cv.wait(count).unwrap_or_else(|p| p.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    count = self
                        .cv
                        .wait_timeout(count, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|p| p.into_inner().0);
                }
            }
        }
        true
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_completion_wakes_waiters() {
        let completion = Arc::new(Completion::new());
        assert!(completion.is_finished());
        completion.reset();
        let waiter = {
            let completion = completion.clone();
            thread::spawn(move || completion.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        completion.finish();
        waiter.join().unwrap();
    }

    #[test]
    fn test_in_flight_wait_idle() {
        let in_flight = Arc::new(InFlight::new());
        assert!(in_flight.wait_idle(Some(Duration::from_millis(1))));

        in_flight.enter();
        assert!(!in_flight.wait_idle(Some(Duration::from_millis(20))));

        // Entered here, left by the worker when its guard drops.
        let worker = {
            let in_flight = in_flight.clone();
            thread::spawn(move || {
                let _guard = in_flight.guard();
                thread::sleep(Duration::from_millis(20));
            })
        };
        assert!(in_flight.wait_idle(None));
        worker.join().unwrap();
        assert_eq!(in_flight.count(), 0);
    }
}
