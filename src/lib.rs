pub use crate::config::*;
pub use crate::critical::*;
pub use crate::error::*;
pub use crate::message::*;
pub use crate::peer::*;
pub use crate::poisson::*;
pub use crate::ring::*;
pub use crate::termination::*;
pub use crate::transport::*;

pub mod config;
pub mod critical;
pub mod error;
pub mod message;
pub mod peer;
pub mod poisson;
pub mod ring;
pub mod server;
pub mod termination;
pub mod transport;

/// Total number of critical-section entries across the whole ring before shutdown.
pub const QUOTA: u32 = 5;

/// Default rate (events per second) at which a peer starts wanting access.
pub const RATE: f64 = 40.;
