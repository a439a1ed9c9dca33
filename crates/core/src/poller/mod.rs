//! Discovery poller: reconciles catalog listings against the manifest.

mod discovery;

pub use discovery::{DiscoveryPoller, PollError, PollReport};
