//! Host selection strategies.

mod response_index;
mod round_robin;

pub use response_index::ResponseIndex;
pub use round_robin::RoundRobin;

use crate::config::Algorithm;
use crate::host::Host;
use std::sync::Arc;

/// Strategy for picking the next host from the healthy candidates.
pub trait HostSelector: Send + Sync {
    /// Select the host the next call should go to.
    ///
    /// # Arguments
    ///
    /// * `candidates` - Hosts currently marked healthy, in registry order
    ///
    /// # Returns
    ///
    /// The chosen host, or None if `candidates` is empty.
    fn select<'a>(&self, candidates: &[&'a Arc<Host>]) -> Option<&'a Arc<Host>>;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Build the selector for a configured algorithm.
pub fn selector_for(algorithm: &Algorithm) -> Box<dyn HostSelector> {
    match algorithm {
        Algorithm::ResponseIndex => Box::new(ResponseIndex::new()),
        Algorithm::RoundRobin => Box::new(RoundRobin::new()),
    }
}

#[cfg(test)]
pub(crate) fn test_hosts(names: &[&str]) -> Vec<Arc<Host>> {
    names.iter().map(|name| Arc::new(Host::new(*name, 5))).collect()
}
