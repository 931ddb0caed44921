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

//! Process-wide platform networking subsystem bookkeeping.
//!
//! Servers hold a [`PlatformLease`] for their lifetime. The lease count and the `initialized`
//! flag model a socket library that has to be set up before the first socket and released
//! after the last one. On every platform this crate supports the Rust standard library does
//! that itself, so [`requires_explicit_init`] is false and init and teardown are no-ops: only
//! the bookkeeping changes, and nothing is torn down.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::debug;

#[derive(Default)]
struct Subsystem {
    leases: usize,
    initialized: bool,
}

static SUBSYSTEM: Lazy<Mutex<Subsystem>> = Lazy::new(|| Mutex::new(Subsystem::default()));

/// Whether this platform needs explicit socket library setup beyond what `std` performs.
pub fn requires_explicit_init() -> bool {
    false
}

/// Number of live leases, across all servers in the process.
pub fn active_leases() -> usize {
    SUBSYSTEM.lock().map(|s| s.leases).unwrap_or(0)
}

pub fn is_initialized() -> bool {
    SUBSYSTEM.lock().map(|s| s.initialized).unwrap_or(false)
}

/// A reference on the platform networking subsystem, released on drop.
pub struct PlatformLease {
    teardown: bool,
}

impl PlatformLease {
    pub fn acquire(teardown: bool) -> Self {
        let mut subsystem = SUBSYSTEM.lock().unwrap_or_else(|p| p.into_inner());
        if !subsystem.initialized {
            if requires_explicit_init() {
                debug!("Initializing platform networking subsystem");
            }
            subsystem.initialized = true;
        }
        subsystem.leases += 1;
        Self { teardown }
    }
}

impl Drop for PlatformLease {
    fn drop(&mut self) {
        let mut subsystem = SUBSYSTEM.lock().unwrap_or_else(|p| p.into_inner());
        subsystem.leases = subsystem.leases.saturating_sub(1);
        if subsystem.leases == 0 && self.teardown && subsystem.initialized {
            if requires_explicit_init() {
                debug!("Tearing down platform networking subsystem");
            }
            subsystem.initialized = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(platform)]
    fn test_last_tearing_down_lease_releases() {
        let base = active_leases();
        let a = PlatformLease::acquire(true);
        let b = PlatformLease::acquire(true);
        assert!(is_initialized());
        assert_eq!(active_leases(), base + 2);
        drop(a);
        assert!(is_initialized());
        drop(b);
        assert_eq!(active_leases(), base);
        if base == 0 {
            assert!(!is_initialized());
        }
    }

    #[test]
    #[serial(platform)]
    fn test_teardown_only_changes_bookkeeping() {
        assert!(!requires_explicit_init());
        let base = active_leases();
        drop(PlatformLease::acquire(true));
        assert_eq!(active_leases(), base);
        // A fresh socket still works after the last lease went away.
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(socket.local_addr().is_ok());
    }

    #[test]
    #[serial(platform)]
    fn test_lease_without_teardown_keeps_subsystem() {
        let base = active_leases();
        let lease = PlatformLease::acquire(false);
        drop(lease);
        assert_eq!(active_leases(), base);
        assert!(is_initialized());
    }
}
