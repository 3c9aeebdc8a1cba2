//! Copy-on-write set of hosts.

use crate::host::Host;
use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Hosts added and removed by a membership update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MembershipChange {
    /// Whether the update changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The live host set.
///
/// Readers load the current list without locking. Writers serialize on a
/// mutex, build a new list that reuses the existing `Host` values, and
/// publish it atomically, so a host's counters survive membership changes.
pub struct HostRegistry {
    /// Current hosts in insertion order.
    hosts: ArcSwap<Vec<Arc<Host>>>,
    /// Configured hosts; discovery never removes these.
    seeds: ArcSwap<HashSet<String>>,
    /// Serializes writers.
    writer: Mutex<()>,
    /// Latency window size for newly created hosts.
    window_size: usize,
}

impl HostRegistry {
    /// Create a registry from host names, dropping duplicates.
    pub fn new<I, S>(names: I, window_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let hosts: Vec<Arc<Host>> = names
            .into_iter()
            .map(Into::into)
            .filter(|name| seen.insert(name.clone()))
            .map(|name| Arc::new(Host::new(name, window_size)))
            .collect();

        Self {
            hosts: ArcSwap::from_pointee(hosts),
            seeds: ArcSwap::from_pointee(seen),
            writer: Mutex::new(()),
            window_size,
        }
    }

    /// Borrow the current host list without cloning it.
    pub fn snapshot(&self) -> Guard<Arc<Vec<Arc<Host>>>> {
        self.hosts.load()
    }

    /// Owned handle to the current host list.
    pub fn hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.hosts.load_full()
    }

    /// Look up a host by name.
    pub fn get(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts
            .load()
            .iter()
            .find(|host| host.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.load().is_empty()
    }

    /// Whether `name` came from the configured host list.
    pub fn is_seed(&self, name: &str) -> bool {
        self.seeds.load().contains(name)
    }

    /// Add hosts that aren't already present. New hosts start healthy.
    pub fn add<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.writer.lock();
        let current = self.hosts.load_full();

        let mut known: HashSet<String> = current.iter().map(|h| h.name().to_string()).collect();
        let mut next = current.as_ref().clone();
        let mut added = Vec::new();

        for name in names.into_iter().map(Into::into) {
            if known.insert(name.clone()) {
                next.push(Arc::new(Host::new(name.clone(), self.window_size)));
                added.push(name);
            }
        }

        if !added.is_empty() {
            self.hosts.store(Arc::new(next));
            info!(hosts = ?added, "hosts added");
        }
        added
    }

    /// Remove the named hosts. Unknown names are ignored.
    pub fn remove(&self, names: &[String]) -> Vec<String> {
        let _guard = self.writer.lock();
        let current = self.hosts.load_full();

        let (removed, kept): (Vec<Arc<Host>>, Vec<Arc<Host>>) = current
            .iter()
            .cloned()
            .partition(|host| names.iter().any(|name| name == host.name()));

        let removed: Vec<String> = removed.iter().map(|h| h.name().to_string()).collect();
        if !removed.is_empty() {
            self.hosts.store(Arc::new(kept));
            info!(hosts = ?removed, "hosts removed");
        }
        removed
    }

    /// Make the host set exactly `names`, keeping the state of hosts present
    /// in both the old and new sets.
    pub fn replace<I, S>(&self, names: I) -> MembershipChange
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.writer.lock();
        let current = self.hosts.load_full();

        let mut seen = HashSet::new();
        let wanted: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|name| seen.insert(name.clone()))
            .collect();

        let mut change = MembershipChange::default();
        let next: Vec<Arc<Host>> = wanted
            .iter()
            .map(|name| {
                current
                    .iter()
                    .find(|host| host.name() == name)
                    .cloned()
                    .unwrap_or_else(|| {
                        change.added.push(name.clone());
                        Arc::new(Host::new(name.clone(), self.window_size))
                    })
            })
            .collect();

        change.removed = current
            .iter()
            .filter(|host| !seen.contains(host.name()))
            .map(|host| host.name().to_string())
            .collect();

        self.seeds.store(Arc::new(seen));
        if !change.is_empty() {
            self.hosts.store(Arc::new(next));
            info!(added = ?change.added, removed = ?change.removed, "host set replaced");
        }
        change
    }
}
