use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;
use wiresim_core::{MetricsSink, TelemetryRecord};

/// Fans every record out to several sinks.
#[derive(Default)]
pub struct Tee(Vec<Box<dyn MetricsSink>>);

impl Tee {
    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.0.push(Box::new(sink));
        self
    }
}

impl MetricsSink for Tee {
    fn record(&mut self, at: Duration, record: &TelemetryRecord) {
        for sink in &mut self.0 {
            sink.record(at, record);
        }
    }
}

#[derive(Serialize)]
struct Line<'a> {
    at_ms: f64,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Writes one JSON object per record.
pub struct JsonLines<W: Write> {
    out: W,
    events_only: bool,
    failed: bool,
}

impl<W: Write> JsonLines<W> {
    pub fn new(out: W, events_only: bool) -> Self {
        Self {
            out,
            events_only,
            failed: false,
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: Write> MetricsSink for JsonLines<W> {
    fn record(&mut self, at: Duration, record: &TelemetryRecord) {
        let is_event = matches!(record, TelemetryRecord::Message(_) | TelemetryRecord::RoundTrip(_));
        if self.failed || (self.events_only && !is_event) {
            return;
        }
        let line = Line {
            at_ms: at.as_micros() as f64 / 1000.0,
            record,
        };
        let written = serde_json::to_writer(&mut self.out, &line)
            .map_err(io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(err) = written {
            log::error!("telemetry output failed, no further records will be written: {err}");
            self.failed = true;
        }
    }
}
