//! Concrete collaborators used by the binary: a log-backed error sink and a
//! shell-script address hook.

mod log_sink;
mod script;

pub use log_sink::{Severity, TracingErrorSink};
pub use script::ScriptHook;
