pub(crate) mod monitor;
pub(crate) mod registry;
pub(crate) mod topology;

pub(crate) use monitor::{Monitor, DEFAULT_HEARTBEAT_FREQUENCY, MIN_HEARTBEAT_FREQUENCY};
pub(crate) use topology::Topology;
