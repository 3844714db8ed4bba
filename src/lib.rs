//! Mechanism chain elements that provision dataplane interfaces for
//! network-service-mesh connections.
//!
//! Every element forwards a request to the rest of the chain first and
//! configures the dataplane on the way back, closing everything it and the
//! inner elements set up when its own step fails.

mod chain;
pub use chain::*;
mod config;
pub use config::*;
mod connection;
pub use connection::*;
mod context;
pub use context::*;
mod error;
pub use error::*;
mod memif;
pub use memif::*;
mod metadata;
pub use metadata::*;
mod postpone;
pub use postpone::*;
mod vlan;
pub use vlan::*;
mod vpp;
pub use vpp::*;
