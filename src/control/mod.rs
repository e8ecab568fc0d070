mod service;

pub use service::{Command, CommandError, ControlService};
