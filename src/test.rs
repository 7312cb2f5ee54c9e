mod util;

pub(crate) use util::{HostSpec, MockDeployment};
