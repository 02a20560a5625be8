//! Side channels for timing and fault reporting. Implementations are called
//! inline on the request path and must return quickly.

use std::time::Duration;

pub trait Observer: Send + Sync {
    /// One dispatched call finished. `code` is the error code, `None` on success.
    fn call_completed(&self, _method: &str, _code: Option<i64>, _elapsed: Duration) {}

    /// A whole HTTP exchange finished.
    fn request_completed(&self, _code: Option<i64>, _elapsed: Duration) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Logs timings at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn call_completed(&self, method: &str, code: Option<i64>, elapsed: Duration) {
        tracing::debug!(method, ?code, ?elapsed, "method responded");
    }

    fn request_completed(&self, code: Option<i64>, elapsed: Duration) {
        tracing::debug!(?code, ?elapsed, "request processed");
    }
}

/// Receives faults caught at a dispatch unit boundary. The returned token, if
/// any, ends up in the `data` member of that call's error.
pub trait FaultReporter: Send + Sync {
    fn report(&self, method: &str, fault: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, method: &str, fault: &str) -> Option<String> {
        let token = uuid::Uuid::new_v4().to_string();
        tracing::error!(method, fault, %token, "handler panicked");
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_reporter_hands_out_distinct_tokens() {
        let reporter = TracingReporter;
        let a = reporter.report("m", "boom").unwrap();
        let b = reporter.report("m", "boom").unwrap();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }
}
