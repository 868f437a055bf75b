//! Drive WS281x LED strips from a Raspberry Pi 4 by streaming a pre-encoded waveform from
//! memory into the PWM serializer with DMA. The CPU never touches individual bits.
//!
//! # Glossary
//!
//! - **Tick:** one PWM clock period, the oscillator (54 MHz) divided by 22, about 407 ns.
//! - **Frame:** all LEDs of one strip followed by the low reset pulse (at least 280 µs).
//! - **Coherent memory:** memory the CPU writes and the DMA engine reads without cache
//!   maintenance.
//! - **Control block:** the 32-byte descriptor the DMA engine reads to learn source,
//!   destination, length, and pacing.
//!
//! # Layers
//!
//! - [`waveform`]: brightness byte to three-tick-per-bit pattern table and converter.
//! - [`hw`]: the [`hw::Platform`] capability that maps registers and allocates coherent memory.
//! - [`registers`], [`clock`], [`pwm`], [`dma`]: per-block hardware setup.
//! - [`channel`]: one strip's open → write → close state machine.
//! - [`registry`]: both strips behind per-channel locks, plus a
//!   [`smart_leds::SmartLedsWrite`] handle.
//! - [`command`]: the `[{r,g,b}…]` text protocol.
//!
//! Logging goes through `log` by default, or `defmt` with the `defmt` feature.
#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every other module.
mod fmt;

pub mod channel;
pub mod clock;
pub mod command;
pub mod config;
pub mod dma;
mod error;
pub mod hw;
pub mod pwm;
pub mod register_map;
pub mod registers;
pub mod registry;
pub mod waveform;

// Re-export error types and result (used throughout)
pub use crate::channel::ChannelState;
pub use crate::config::{ChannelId, StripConfig};
pub use crate::error::{Error, Resource, Result, WaitOperation};
pub use crate::registry::{Registry, Strip};
