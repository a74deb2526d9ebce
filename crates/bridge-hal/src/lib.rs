//! `bridge-hal` – sensor driver seam.
//!
//! The bridge never talks to I2C or serial registers itself; it polls
//! [`SensorDriver`] implementations.
//!
//! # Modules
//!
//! - [`sensor`] – the [`SensorDriver`] trait and boxed driver aliases.
//! - [`line`] – drivers for devices that stream one text record per fix,
//!   plus the parsers that pick the sample shape at the driver boundary.
//! - [`sim`] – simulated and scripted drivers for headless runs and tests.

pub mod line;
pub mod sensor;
pub mod sim;

pub use line::{LineDriver, LineLink, LineOrientationDriver, LinePositionDriver};
pub use sensor::{OrientationDriver, PositionDriver, SensorDriver};
pub use sim::{DriverStats, ScriptedDriver, SimOrientationDriver, SimPositionDriver};
