pub mod forwarder;
pub mod health;
pub mod target;

pub use forwarder::{ForwardError, Forwarder};
pub use health::start_health_check_loop;
pub use target::{TargetHealth, TargetPool, UpstreamTarget};
