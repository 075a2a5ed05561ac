//! Gateway-side views over the fleet provider.
//!
//! - [`FleetDirectory`] answers "which workers are routable right now"
//! - [`FleetScaler`] turns demand into (capped) resize requests

mod directory;
mod scaler;

pub use directory::FleetDirectory;
pub use scaler::FleetScaler;
