//! Build-time configuration: channel resource sets, clock parameters, frame sizes, and polling bounds.
//!
//! Everything here is fixed at compile time. [`StripConfig`] exists so a caller (or a test) can
//! shrink the polling bounds; the hardware layout itself is not configurable.

use derive_more::Display;

use crate::register_map::clock::ClockSource;
use crate::{Error, Result};

// ============================================================================
// Frame geometry
// ============================================================================

/// Maximum number of LEDs on one channel.
pub const MAX_LEDS_PER_CHANNEL: usize = 300;

/// Maximum number of brightness bytes per frame (three per LED).
pub const MAX_BRIGHTNESS_BYTES: usize = 3 * MAX_LEDS_PER_CHANNEL;

/// Number of independent output channels.
pub const CHANNEL_COUNT: usize = 2;

/// Minimum low period after a frame before the LEDs latch (microseconds).
pub const RESET_PULSE_US: u32 = 280;

// ============================================================================
// Clock tree
// ============================================================================

/// Reference oscillator frequency feeding the clock manager.
pub const OSCILLATOR_HZ: u32 = 54_000_000;

/// Target frequency of one encoded tick (three ticks per data bit).
pub const TARGET_TICK_HZ: u32 = 2_400_000;

/// Delay between clock-status polls (microseconds).
pub const CLOCK_POLL_INTERVAL_US_DEFAULT: u32 = 10;

/// Number of clock-status polls before giving up.
pub const CLOCK_MAX_POLLS_DEFAULT: u32 = 1_000;

/// Delay between DMA-status polls (microseconds).
pub const DMA_POLL_INTERVAL_US_DEFAULT: u32 = 20;

/// Number of DMA-status polls before giving up.
///
/// Every transfer streams the whole buffer: 2788 bytes of 8 ticks at 407 ns, about 9.1 ms.
pub const DMA_MAX_POLLS_DEFAULT: u32 = 1_000;

/// Number of DMA-status polls after an abort before the engine is reset regardless.
pub const ABORT_MAX_POLLS_DEFAULT: u32 = 100;

/// Integer divider from the reference oscillator down to the tick frequency.
pub const CLOCK_DIVIDER: u32 = OSCILLATOR_HZ / TARGET_TICK_HZ;

/// Duration of one tick in nanoseconds, rounded down (407 for the defaults).
pub const TICK_NS: u32 = tick_ns(OSCILLATOR_HZ, CLOCK_DIVIDER);

/// Ticks of low output that cover [`RESET_PULSE_US`].
pub const RESET_TICKS: usize = reset_ticks(OSCILLATOR_HZ, CLOCK_DIVIDER, RESET_PULSE_US);

/// Bytes of zero appended after the frame data, rounded up to whole 32-bit FIFO words.
pub const RESET_BYTES: usize = RESET_TICKS.div_ceil(32) * 4;

/// Serialized bytes for a maximum-length frame, excluding the reset pulse.
pub const MAX_FRAME_BYTES: usize = 3 * MAX_BRIGHTNESS_BYTES;

/// Total waveform buffer carried by one DMA transfer.
pub const WAVEFORM_BUFFER_BYTES: usize = MAX_FRAME_BYTES + RESET_BYTES;

/// Nanoseconds per tick for a reference frequency and integer divider.
#[must_use]
pub const fn tick_ns(reference_hz: u32, divider: u32) -> u32 {
    let period_ns = 1_000_000_000_u64 * divider as u64 / reference_hz as u64;
    period_ns as u32
}

/// Ticks needed to hold the line low for `reset_us`, rounded up.
#[must_use]
pub const fn reset_ticks(reference_hz: u32, divider: u32, reset_us: u32) -> usize {
    let numerator = reset_us as u64 * reference_hz as u64;
    let denominator = 1_000_000_u64 * divider as u64;
    numerator.div_ceil(denominator) as usize
}

// ============================================================================
// Physical address map (BCM2711)
// ============================================================================

/// Base of the peripheral window as seen by the ARM cores.
pub const PERIPHERAL_PHYS_BASE: u32 = 0xFE00_0000;

/// Base of the peripheral window as seen by the DMA engines (legacy bus addresses).
pub const PERIPHERAL_BUS_BASE: u32 = 0x7E00_0000;

const PWM0_OFFSET: u32 = 0x0020_C000;
const PWM1_OFFSET: u32 = 0x0020_C800;
const CLOCK_PWM_OFFSET: u32 = 0x0010_10A0;
const DMA_CHANNEL_0_14_OFFSET: u32 = 0x0000_7000;
const DMA_CHANNEL_15_OFFSET: u32 = 0x00E0_5000;
const DMA_CHANNEL_STRIDE: u32 = 0x100;

/// DMA peripheral-map line for PWM0.
pub const PWM0_DREQ: u8 = 5;

/// DMA peripheral-map line for PWM1.
pub const PWM1_DREQ: u8 = 1;

/// Physical address of a DMA engine's register block.
///
/// Channels 0–14 share one bank, channel 15 lives in a separate one.
pub const fn dma_channel_phys(channel: u8) -> Result<u32> {
    match channel {
        0..=14 => Ok(PERIPHERAL_PHYS_BASE
            + DMA_CHANNEL_0_14_OFFSET
            + channel as u32 * DMA_CHANNEL_STRIDE),
        15 => Ok(PERIPHERAL_PHYS_BASE + DMA_CHANNEL_15_OFFSET),
        _ => Err(Error::invalid("no DMA channel above 15")),
    }
}

// ============================================================================
// Channel identity
// ============================================================================

/// One of the two output strips.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    /// PWM0 channel 1, DMA engine 10.
    #[display("strip0")]
    Strip0 = 0,
    /// PWM1 channel 1, DMA engine 9.
    #[display("strip1")]
    Strip1 = 1,
}

impl ChannelId {
    /// Both channels, in index order.
    pub const ALL: [Self; CHANNEL_COUNT] = [Self::Strip0, Self::Strip1];

    /// Slot index of this channel.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The fixed hardware resource set for this channel.
    #[must_use]
    pub const fn resources(self) -> ChannelResources {
        match self {
            Self::Strip0 => ChannelResources {
                pwm_phys: PERIPHERAL_PHYS_BASE + PWM0_OFFSET,
                pwm_bus: PERIPHERAL_BUS_BASE + PWM0_OFFSET,
                clock_phys: PERIPHERAL_PHYS_BASE + CLOCK_PWM_OFFSET,
                dma_channel: 10,
                dreq: PWM0_DREQ,
            },
            Self::Strip1 => ChannelResources {
                pwm_phys: PERIPHERAL_PHYS_BASE + PWM1_OFFSET,
                pwm_bus: PERIPHERAL_BUS_BASE + PWM1_OFFSET,
                clock_phys: PERIPHERAL_PHYS_BASE + CLOCK_PWM_OFFSET,
                // Engines 11 to 14 are DMA4 engines with another register layout.
                dma_channel: 9,
                dreq: PWM1_DREQ,
            },
        }
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Strip0),
            1 => Ok(Self::Strip1),
            _ => Err(Error::invalid("unknown channel id")),
        }
    }
}

/// Physical and bus addresses a channel drives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelResources {
    /// PWM block, CPU-physical.
    pub pwm_phys: u32,
    /// PWM block, DMA bus address.
    pub pwm_bus: u32,
    /// Clock-manager PWM control block (shared by both channels).
    pub clock_phys: u32,
    /// DMA engine number.
    pub dma_channel: u8,
    /// DMA peripheral-map line that paces transfers into this PWM's FIFO.
    pub dreq: u8,
}

impl ChannelResources {
    /// Physical address of this channel's DMA engine registers.
    pub const fn dma_phys(&self) -> Result<u32> {
        dma_channel_phys(self.dma_channel)
    }

    /// Bus address of the PWM FIFO the DMA engine writes into.
    #[must_use]
    pub const fn pwm_fifo_bus(&self) -> u32 {
        self.pwm_bus + crate::register_map::pwm::FIF1 as u32
    }
}

// ============================================================================
// Runtime-tunable bounds
// ============================================================================

/// Clock generator settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    /// Clock source feeding the PWM clock.
    pub source: ClockSource,
    /// Frequency of `source` in hertz.
    pub reference_hz: u32,
    /// Desired tick frequency in hertz.
    pub target_hz: u32,
    /// Delay between status polls (microseconds).
    pub poll_interval_us: u32,
    /// Polls before reporting [`Error::HardwareTimeout`].
    pub max_polls: u32,
}

impl ClockConfig {
    /// Oscillator at 54 MHz divided down to about 2.4 MHz.
    pub const DEFAULT: Self = Self {
        source: ClockSource::Oscillator,
        reference_hz: OSCILLATOR_HZ,
        target_hz: TARGET_TICK_HZ,
        poll_interval_us: CLOCK_POLL_INTERVAL_US_DEFAULT,
        max_polls: CLOCK_MAX_POLLS_DEFAULT,
    };
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Settings shared by every channel of a registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StripConfig {
    /// Clock generator settings.
    pub clock: ClockConfig,
    /// Delay between DMA-status polls (microseconds).
    pub dma_poll_interval_us: u32,
    /// DMA-status polls before reporting [`Error::HardwareTimeout`].
    pub dma_max_polls: u32,
    /// DMA-status polls after an abort on the close path.
    pub abort_max_polls: u32,
}

impl StripConfig {
    /// The reference-design configuration.
    pub const DEFAULT: Self = Self {
        clock: ClockConfig::DEFAULT,
        dma_poll_interval_us: DMA_POLL_INTERVAL_US_DEFAULT,
        dma_max_polls: DMA_MAX_POLLS_DEFAULT,
        abort_max_polls: ABORT_MAX_POLLS_DEFAULT,
    };
}

impl Default for StripConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
