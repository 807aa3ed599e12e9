use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lab_transport::TransportKind;

use crate::connection::InstrumentConnection;
use crate::driver::{Driver, InstrumentMetadata};
use crate::instrument::Instrument;

/// Driver for the `TIME` pseudo-instrument
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeDriver;

impl Driver for TimeDriver {
    fn metadata(&self) -> InstrumentMetadata {
        InstrumentMetadata::new("TIME", TransportKind::None)
            .with_named_channel("Time", "s", "Time")
            .with_named_channel("dt", "s", "dt(s)")
    }

    fn create(&self, connection: InstrumentConnection) -> Box<dyn Instrument> {
        Box::new(TimeInstrument::new(connection))
    }
}

/// Reports `Time` (seconds since the Unix epoch) and `dt` (seconds since
/// the last `initialize`)
#[derive(Debug)]
pub struct TimeInstrument {
    connection: InstrumentConnection,
    started: Instant,
}

impl TimeInstrument {
    pub fn new(connection: InstrumentConnection) -> Self {
        Self {
            connection,
            started: Instant::now(),
        }
    }
}

impl Instrument for TimeInstrument {
    fn connection(&self) -> &InstrumentConnection {
        &self.connection
    }

    fn connection_mut(&mut self) -> &mut InstrumentConnection {
        &mut self.connection
    }

    fn initialize(&mut self) {
        self.started = Instant::now();
    }

    fn measure(&mut self, channel: &str) -> Option<f64> {
        let value = match channel {
            "Time" => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(f64::NAN),
            "dt" => self.started.elapsed().as_secs_f64(),
            _ => return None,
        };
        self.connection.record_measurement(channel, value);
        Some(value)
    }
}
