//! Platform-agnostic driver for the INA219 high-side current/power monitor,
//! built on the [`embedded-hal`](https://docs.rs/embedded-hal) I²C traits.

#![no_std]

pub mod ina219;

pub use ina219::{AdcMode, BusRange, Gain, MeasureMode, Register, INA219};
