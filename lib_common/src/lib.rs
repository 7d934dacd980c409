//! Small shared utilities used by the `ftpd` binary at startup: host/process
//! introspection for the daemon's startup log line and default greeting.

pub mod utils;

pub use utils::misc::sys_info::{ProcessInfo, ProcessInfoError, get_process_info};
