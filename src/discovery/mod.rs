pub mod docker;
pub mod scan;

pub use docker::DiscoveredUpstream;
pub use scan::{DiscoveryHandle, DiscoverySnapshot};
