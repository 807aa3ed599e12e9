use lab_transport::TransportKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::connection::InstrumentConnection;
use crate::driver::{Driver, InstrumentMetadata};
use crate::instrument::Instrument;

/// Driver for the `DICE` pseudo-instrument
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceDriver;

impl Driver for DiceDriver {
    fn metadata(&self) -> InstrumentMetadata {
        InstrumentMetadata::new("DICE", TransportKind::None).with_channel("Roll", "")
    }

    fn create(&self, connection: InstrumentConnection) -> Box<dyn Instrument> {
        Box::new(DiceInstrument::new(connection))
    }
}

/// Rolls a fair six-sided die on every `Roll` measurement
#[derive(Debug)]
pub struct DiceInstrument {
    connection: InstrumentConnection,
    rng: StdRng,
}

impl DiceInstrument {
    pub fn new(connection: InstrumentConnection) -> Self {
        Self {
            connection,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for reproducible rolls
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Instrument for DiceInstrument {
    fn connection(&self) -> &InstrumentConnection {
        &self.connection
    }

    fn connection_mut(&mut self) -> &mut InstrumentConnection {
        &mut self.connection
    }

    fn measure(&mut self, channel: &str) -> Option<f64> {
        if channel != "Roll" {
            return None;
        }
        let roll = f64::from(self.rng.gen_range(1u8..=6));
        self.connection.record_measurement(channel, roll);
        Some(roll)
    }
}
