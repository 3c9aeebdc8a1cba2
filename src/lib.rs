//! smartlb - client-side smart load balancing for storage-cluster REST calls
//!
//! Callers ask a [`LoadBalancer`] for the host their next call should go to,
//! then report the call's lifecycle back to that [`Host`]:
//!
//! ```no_run
//! use smartlb::{LoadBalancerFactory, SmartConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let lb = LoadBalancerFactory::new(SmartConfig::new(["10.0.0.1", "10.0.0.2"])).build()?;
//!
//! let host = lb.select_host()?;
//! host.connection_opened();
//! // ... perform the call against host.name() ...
//! host.call_complete(42, false);
//! host.connection_closed()?;
//!
//! lb.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Hosts are ranked by recent response time weighted by in-flight calls,
//! and a background poller pings the cluster to take unhealthy nodes out of
//! rotation.

pub mod balancer;
pub mod config;
pub mod factory;
pub mod health;
pub mod host;
pub mod metrics;
pub mod util;

pub use balancer::{LoadBalancer, LoadBalancerError};
pub use config::SmartConfig;
pub use factory::{FactoryError, LoadBalancerFactory, SmartLoadBalancer};
pub use host::{Host, HostError, HostStats};
