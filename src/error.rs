//! Error and result types shared by every layer of the strip engine.

use derive_more::{Display, Error};

use crate::channel::ChannelState;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by the strip engine.
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An argument was out of range: unknown channel, bad length, malformed command.
    #[display("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },
    /// A register window could not be mapped or DMA memory could not be allocated.
    #[display("{resource} unavailable")]
    ResourceUnavailable {
        /// The resource that could not be acquired.
        resource: Resource,
    },
    /// The hardware did not reach the expected state within the polling bound.
    #[display("timed out waiting for {operation}")]
    HardwareTimeout {
        /// The wait that gave up.
        operation: WaitOperation,
    },
    /// The operation is not allowed in the channel's current state.
    #[display("cannot {operation} while channel is {state}")]
    StateViolation {
        /// The rejected operation.
        operation: &'static str,
        /// The state the channel was in.
        state: ChannelState,
    },
}

/// Hardware resources a channel acquires while opening.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resource {
    /// The channel's PWM register block.
    #[display("PWM register window")]
    PwmWindow,
    /// The shared clock-manager register block.
    #[display("clock register window")]
    ClockWindow,
    /// The channel's DMA engine register block.
    #[display("DMA register window")]
    DmaWindow,
    /// Coherent memory for the transfer descriptor and waveform buffer.
    #[display("DMA memory")]
    DmaMemory,
}

/// Bounded hardware waits that can time out.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOperation {
    /// Clock generator to stop before its divider is changed.
    #[display("clock to stop")]
    ClockStop,
    /// Clock generator to report running after being enabled.
    #[display("clock to start")]
    ClockStart,
    /// DMA engine to finish (or abandon) the current frame.
    #[display("DMA engine to go idle")]
    DmaIdle,
}

impl Error {
    pub(crate) const fn invalid(reason: &'static str) -> Self {
        Self::InvalidArgument { reason }
    }

    pub(crate) const fn unavailable(resource: Resource) -> Self {
        Self::ResourceUnavailable { resource }
    }

    pub(crate) const fn timeout(operation: WaitOperation) -> Self {
        Self::HardwareTimeout { operation }
    }

    pub(crate) const fn state(operation: &'static str, state: ChannelState) -> Self {
        Self::StateViolation { operation, state }
    }
}
