//! Error sink that writes to `tracing`.

use std::io;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::core::{ErrorSink, LivenessError};

/// How a reported error is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Not logged at all.
    Suppressed,
    /// Expected churn: the peer hung up.
    Debug,
    /// The peer dropped the connection abruptly.
    Warn,
    /// Everything else.
    Error,
}

/// Logs engine errors by severity, dropping consecutive repeats.
///
/// The de-duplication state belongs to this instance, so separate sinks
/// never silence each other.
#[derive(Debug, Default)]
pub struct TracingErrorSink {
    last: Mutex<Option<String>>,
}

impl TracingErrorSink {
    /// Create a sink that has logged nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Severity `err` would be logged at, ignoring repeats.
    pub fn severity(err: &LivenessError) -> Severity {
        match err.io_kind() {
            // Raised when we tore the connection down ourselves.
            Some(io::ErrorKind::ConnectionAborted) => Severity::Suppressed,
            Some(io::ErrorKind::UnexpectedEof) => Severity::Debug,
            Some(io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => Severity::Warn,
            _ => Severity::Error,
        }
    }

    /// Decide how to log `err` and remember its message if it is logged.
    pub fn classify(&self, err: &LivenessError) -> (Severity, String) {
        let message = err.to_string();
        let mut last = self.last.lock();
        if last.as_deref() == Some(message.as_str()) {
            return (Severity::Suppressed, message);
        }
        let severity = Self::severity(err);
        if severity != Severity::Suppressed {
            *last = Some(message.clone());
        }
        (severity, message)
    }
}

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: &LivenessError) {
        match self.classify(err) {
            (Severity::Suppressed, _) => {}
            (Severity::Debug, message) => debug!("{message}"),
            (Severity::Warn, message) => warn!("{message}"),
            (Severity::Error, message) => error!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn io_err(kind: io::ErrorKind) -> LivenessError {
        LivenessError::Io(io::Error::new(kind, format!("{kind:?}")))
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            TracingErrorSink::severity(&io_err(io::ErrorKind::UnexpectedEof)),
            Severity::Debug
        );
        assert_eq!(
            TracingErrorSink::severity(&io_err(io::ErrorKind::BrokenPipe)),
            Severity::Warn
        );
        assert_eq!(
            TracingErrorSink::severity(&io_err(io::ErrorKind::ConnectionReset)),
            Severity::Warn
        );
        assert_eq!(
            TracingErrorSink::severity(&io_err(io::ErrorKind::ConnectionAborted)),
            Severity::Suppressed
        );
        let timeout = LivenessError::Timeout {
            op: "read",
            timeout: Duration::from_secs(1),
        };
        assert_eq!(TracingErrorSink::severity(&timeout), Severity::Error);
        assert_eq!(
            TracingErrorSink::severity(&LivenessError::InvalidAddressLength(5)),
            Severity::Error
        );
    }

    #[test]
    fn test_repeats_suppressed() {
        let sink = TracingErrorSink::new();
        let refused = LivenessError::Dial {
            addr: "127.0.0.1:1".into(),
            source: io::ErrorKind::ConnectionRefused.into(),
        };

        assert_eq!(sink.classify(&refused).0, Severity::Error);
        assert_eq!(sink.classify(&refused).0, Severity::Suppressed);

        let eof = io_err(io::ErrorKind::UnexpectedEof);
        assert_eq!(sink.classify(&eof).0, Severity::Debug);
        assert_eq!(sink.classify(&refused).0, Severity::Error);
    }

    #[test]
    fn test_suppressed_does_not_reset_repeat() {
        let sink = TracingErrorSink::new();
        let reset = io_err(io::ErrorKind::ConnectionReset);

        assert_eq!(sink.classify(&reset).0, Severity::Warn);
        let aborted = io_err(io::ErrorKind::ConnectionAborted);
        assert_eq!(sink.classify(&aborted).0, Severity::Suppressed);
        assert_eq!(sink.classify(&reset).0, Severity::Suppressed);
    }

    #[test]
    fn test_sinks_are_independent() {
        let a = TracingErrorSink::new();
        let b = TracingErrorSink::new();
        let eof = io_err(io::ErrorKind::UnexpectedEof);

        assert_eq!(a.classify(&eof).0, Severity::Debug);
        assert_eq!(b.classify(&eof).0, Severity::Debug);
    }
}
