//! Host selection and the shared host set.

pub mod algorithms;
mod load_balancer;
mod registry;

pub use load_balancer::{LoadBalancer, LoadBalancerError};
pub use registry::{HostRegistry, MembershipChange};
