//! Environment signal intake and violation policy.

pub mod monitor;
pub mod source;

pub use monitor::{Detection, IntegrityMonitor, MonitorState, Verdict};
pub use source::{ChannelEnvironmentSource, EnvironmentSignal, EnvironmentSource};
