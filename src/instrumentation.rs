/*!
 * Timing and logging envelope around units of work
 *
 * [`Instrumenter::instrument`] runs a closure, measures how long it took and
 * reports the payload's operations to a [`LogSink`]. Failures are logged
 * with their type and message and then handed back to the caller as they
 * were: an `Err` is returned unchanged and a panic is resumed with its
 * original payload.
 */

use std::any::{type_name, Any};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, warn};

/// Destination for instrumentation output; calls must not fail
pub trait LogSink: Send + Sync {
    fn debug(&self, message: &str);

    fn warn(&self, prefix: &str, message: &str, runtime: &str);

    fn log_operations(&self, prefix: &str, ops: &[String], runtime: &str);
}

/// Sink emitting `tracing` events under the `nodepool::ops` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn debug(&self, message: &str) {
        debug!(target: "nodepool::ops", "{}", message);
    }

    fn warn(&self, prefix: &str, message: &str, runtime: &str) {
        warn!(target: "nodepool::ops", "{} {} runtime: {}", prefix, message, runtime);
    }

    fn log_operations(&self, prefix: &str, ops: &[String], runtime: &str) {
        for op in ops {
            debug!(target: "nodepool::ops", "{} {} runtime: {}", prefix, op, runtime);
        }
    }
}

/// Type and message of a failed unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub class: String,
    pub message: String,
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class, self.message)
    }
}

/// Description of one instrumented unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPayload {
    /// Label prepended to every log line
    pub prefix: String,
    /// Logical operations performed, in order
    pub ops: Vec<String>,
    /// Filled in when the work fails
    pub exception: Option<FailureInfo>,
}

impl OperationPayload {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.ops.push(op.into());
        self
    }

    pub fn push_op(&mut self, op: impl Into<String>) {
        self.ops.push(op.into());
    }
}

/// Elapsed time since `started`, as milliseconds with four decimals
pub fn runtime(started: Instant) -> String {
    format!("{:.4}ms", started.elapsed().as_secs_f64() * 1000.0)
}

/// Wraps units of work with timing and logging
#[derive(Clone)]
pub struct Instrumenter {
    sink: Arc<dyn LogSink>,
}

impl Instrumenter {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Run `work`, logging its operations and how long it took
    ///
    /// On success the operations are logged once. On failure the payload's
    /// `exception` is set, a warning carrying the failure is logged, the
    /// operations are logged, and the failure is handed back untouched.
    pub fn instrument<T, E, F>(
        &self,
        name: &str,
        payload: &mut OperationPayload,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let span = debug_span!("instrument", label = name);
        let _entered = span.enter();

        let started = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => {
                self.sink
                    .log_operations(&payload.prefix, &payload.ops, &runtime(started));
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure(payload, type_name::<E>(), error.to_string(), started);
                Err(error)
            }
            Err(panic_payload) => {
                let message = panic_message(&*panic_payload);
                self.record_failure(payload, "panic", message, started);
                panic::resume_unwind(panic_payload)
            }
        }
    }

    fn record_failure(
        &self,
        payload: &mut OperationPayload,
        class: &str,
        message: String,
        started: Instant,
    ) {
        let elapsed = runtime(started);
        let failure = FailureInfo {
            class: class.to_string(),
            message,
        };
        self.sink.warn(&payload.prefix, &failure.to_string(), &elapsed);
        payload.exception = Some(failure);
        self.sink.log_operations(&payload.prefix, &payload.ops, &elapsed);
    }
}

impl Default for Instrumenter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumenter").finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
