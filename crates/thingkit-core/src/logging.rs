// ── Caller-supplied log sinks ──
//
// The runtime always emits `tracing` events. Callers may additionally
// attach one sink per level; a level with no sink is silent. The same
// sinks can be handed to the transport when `log_mqtt` is enabled.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

/// Receives fully formatted log lines for one level.
pub trait LogSink: Send + Sync {
    fn write(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write(&self, message: &str) {
        self(message);
    }
}

/// Forwards sink lines into `tracing` at a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    level: Level,
}

impl TracingSink {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl LogSink for TracingSink {
    fn write(&self, message: &str) {
        let level = self.level;
        if level == Level::ERROR {
            tracing::error!(target: "thingkit::sink", "{message}");
        } else if level == Level::WARN {
            tracing::warn!(target: "thingkit::sink", "{message}");
        } else if level == Level::INFO {
            tracing::info!(target: "thingkit::sink", "{message}");
        } else if level == Level::DEBUG {
            tracing::debug!(target: "thingkit::sink", "{message}");
        } else {
            tracing::trace!(target: "thingkit::sink", "{message}");
        }
    }
}

/// The three optional leveled sinks.
#[derive(Clone, Default)]
pub struct LogSinks {
    pub debug: Option<Arc<dyn LogSink>>,
    pub info: Option<Arc<dyn LogSink>>,
    pub error: Option<Arc<dyn LogSink>>,
}

impl LogSinks {
    /// All three levels routed into `tracing`.
    pub fn tracing() -> Self {
        Self {
            debug: Some(Arc::new(TracingSink::new(Level::DEBUG))),
            info: Some(Arc::new(TracingSink::new(Level::INFO))),
            error: Some(Arc::new(TracingSink::new(Level::ERROR))),
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        emit(self.debug.as_deref(), args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        emit(self.info.as_deref(), args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        emit(self.error.as_deref(), args);
    }
}

impl fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSinks")
            .field("debug", &self.debug.is_some())
            .field("info", &self.info.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

// Formatting only happens when a sink is attached.
fn emit(sink: Option<&dyn LogSink>, args: fmt::Arguments<'_>) {
    if let Some(sink) = sink {
        match args.as_str() {
            Some(message) => sink.write(message),
            None => sink.write(&args.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl LogSink for Capture {
        fn write(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_owned());
        }
    }

    #[test]
    fn absent_level_is_silent() {
        let capture = Arc::new(Capture::default());
        let sinks = LogSinks {
            info: Some(capture.clone()),
            ..LogSinks::default()
        };

        sinks.debug(format_args!("dropped {}", 1));
        sinks.info(format_args!("kept {}", 2));
        sinks.error(format_args!("dropped"));

        assert_eq!(*capture.0.lock().unwrap(), vec!["kept 2".to_string()]);
    }

    #[test]
    fn closures_are_sinks() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sinks = LogSinks {
            error: Some(Arc::new(move |line: &str| {
                captured.lock().unwrap().push(line.to_owned());
            })),
            ..LogSinks::default()
        };

        sinks.error(format_args!("lost connection"));
        assert_eq!(lines.lock().unwrap().as_slice(), ["lost connection"]);
    }
}
