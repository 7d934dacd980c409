//! Miscellaneous host/process introspection used by the daemon's startup log line.
pub mod sys_info;
