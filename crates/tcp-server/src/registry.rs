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

//! The live index from peer IP to the connection handles open for it.

use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe mapping from a peer's textual IPv4 address to the handles currently open for
/// that peer. A handle is a secondary index entry here; the registry never owns the
/// connection's lifetime.
///
/// All operations serialize on one lock, so counts and snapshots always reflect a state
/// produced by some total order of completed mutations. An IP is present only while it has at
/// least one handle.
pub struct ClientRegistry<H> {
    inner: Mutex<HashMap<String, Vec<H>>>,
}

impl<H> Default for ClientRegistry<H> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<H: Clone + PartialEq> ClientRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<H>>> {
        // The map is left consistent by every operation, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, ip: &str, handle: H) {
        let mut inner = self.locked();
        inner.entry(ip.to_string()).or_default().push(handle);
    }

    /// Remove `handle` from `ip`'s collection. Returns false (and changes nothing) if either
    /// was absent.
    pub fn remove(&self, ip: &str, handle: &H) -> bool {
        let mut inner = self.locked();
        let Some(handles) = inner.get_mut(ip) else {
            return false;
        };
        let Some(position) = handles.iter().position(|h| h == handle) else {
            return false;
        };
        handles.remove(position);
        if handles.is_empty() {
            inner.remove(ip);
        }
        true
    }

    /// Atomically remove and return every handle registered for `ip`.
    pub fn extract(&self, ip: &str) -> Vec<H> {
        self.locked().remove(ip).unwrap_or_default()
    }

    /// Atomically remove and return every entry.
    pub fn extract_all(&self) -> Vec<(String, Vec<H>)> {
        self.locked().drain().collect()
    }

    pub fn lookup(&self, ip: &str) -> Vec<H> {
        self.locked().get(ip).cloned().unwrap_or_default()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.locked().contains_key(ip)
    }

    /// A point-in-time copy of every (ip, handles) pair.
    pub fn snapshot(&self) -> Vec<(String, Vec<H>)> {
        self.locked()
            .iter()
            .map(|(ip, handles)| (ip.clone(), handles.clone()))
            .collect()
    }

    pub fn count_clients(&self) -> usize {
        self.locked().len()
    }

    pub fn count_connections(&self) -> usize {
        self.locked().values().map(Vec::len).sum()
    }
}
