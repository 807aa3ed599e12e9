//! Built-in drivers
//!
//! - `TIME`: wall clock and elapsed time, no transport
//! - `DICE`: a six-sided die, no transport
//! - [`GenericDriver`]: SCPI-style instruments described in configuration

mod dice;
mod generic;
mod time;

pub use dice::{DiceDriver, DiceInstrument};
pub use generic::{GenericChannel, GenericDriver, GenericDriverConfig, GenericInstrument};
pub use time::{TimeDriver, TimeInstrument};
