use std::panic::{catch_unwind, AssertUnwindSafe};

// ============================================================================
// Telemetry Sink
// ============================================================================
//
// Fire-and-forget event recording. Sinks may fail; callers go through
// `emit`, which swallows both errors and panics so telemetry can never fail
// the request it describes.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Missing field `{field}` for event `{event}`")]
    MissingField { event: String, field: &'static str },

    #[error("Metric error: {0}")]
    Metric(String),
}

impl From<prometheus::Error> for TelemetryError {
    fn from(err: prometheus::Error) -> Self {
        TelemetryError::Metric(err.to_string())
    }
}

pub type Fields<'a> = [(&'a str, String)];

pub trait Telemetry: Send + Sync {
    fn record(&self, event: &str, fields: &Fields<'_>) -> Result<(), TelemetryError>;
}

/// Record `event` on `sink`, discarding any failure.
pub fn emit(sink: &dyn Telemetry, event: &str, fields: &Fields<'_>) {
    match catch_unwind(AssertUnwindSafe(|| sink.record(event, fields))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(event = %event, error = %e, "Telemetry record dropped");
        }
        Err(_) => {
            tracing::debug!(event = %event, "Telemetry sink panicked, record dropped");
        }
    }
}

/// Look up a field value by name.
pub fn field<'a>(fields: &'a Fields<'_>, name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.as_str())
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &str, fields: &Fields<'_>) -> Result<(), TelemetryError> {
        let rendered: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        tracing::info!(target: "telemetry", event = %event, fields = %rendered.join(" "), "📈 telemetry");
        Ok(())
    }
}

/// Fans one event out to several sinks.
pub struct FanoutTelemetry {
    sinks: Vec<std::sync::Arc<dyn Telemetry>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<std::sync::Arc<dyn Telemetry>>) -> Self {
        Self { sinks }
    }
}

impl Telemetry for FanoutTelemetry {
    fn record(&self, event: &str, fields: &Fields<'_>) -> Result<(), TelemetryError> {
        for sink in &self.sinks {
            emit(sink.as_ref(), event, fields);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures events for assertions.
    #[derive(Default)]
    pub struct RecordingTelemetry {
        events: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl RecordingTelemetry {
        pub fn events(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(event, _)| event.clone())
                .collect()
        }

        pub fn fields_of(&self, event: &str) -> Option<Vec<(String, String)>> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(name, _)| name == event)
                .map(|(_, fields)| fields.clone())
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn record(&self, event: &str, fields: &Fields<'_>) -> Result<(), TelemetryError> {
            let fields = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            self.events.lock().unwrap().push((event.to_string(), fields));
            Ok(())
        }
    }

    /// Fails or panics on every record.
    pub struct BrokenTelemetry {
        pub panic: bool,
    }

    impl Telemetry for BrokenTelemetry {
        fn record(&self, event: &str, _fields: &Fields<'_>) -> Result<(), TelemetryError> {
            if self.panic {
                panic!("sink exploded on {event}");
            }
            Err(TelemetryError::Metric("sink offline".to_string()))
        }
    }
}
