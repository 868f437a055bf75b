//! One output channel and its open → write → close state machine.
//!
//! ```text
//! Closed ──open──▶ Prepared ──write──▶ Loaded ──arm──▶ Transferring ──engine done──▶ Idle
//!                      ▲                  ▲                  │                        │
//!                      │                  └──── write (waits for the engine) ─────────┘
//!                      └── any failure during open rolls back to Closed
//! ```
//!
//! A channel owns its register windows and DMA region exclusively. Dropping it runs the same
//! best-effort teardown as [`Channel::close`].

use derive_more::Display;
use heapless::Vec;

use crate::config::{ChannelId, MAX_BRIGHTNESS_BYTES, StripConfig};
use crate::dma::{self, DmaRegion};
use crate::hw::Platform;
use crate::registers::RegisterWindow;
use crate::waveform::PATTERN_LEN;
use crate::{Error, Result, clock, pwm};

/// Where a channel is in its lifecycle.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// No hardware held.
    #[display("closed")]
    Closed,
    /// Windows mapped, clock running, DMA region built; nothing sent yet.
    #[display("prepared")]
    Prepared,
    /// Waveform written to the DMA region; engine not yet armed.
    #[display("loaded")]
    Loaded,
    /// Engine armed and possibly still streaming.
    #[display("transferring")]
    Transferring,
    /// Last frame finished.
    #[display("idle")]
    Idle,
}

/// Check that `len` brightness bytes make a whole frame that fits one channel.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `len` is not a multiple of three or exceeds
/// [`MAX_BRIGHTNESS_BYTES`].
pub const fn validate_frame_len(len: usize) -> Result<()> {
    if len % PATTERN_LEN != 0 {
        return Err(Error::invalid("brightness count is not a whole number of LEDs"));
    }
    if len > MAX_BRIGHTNESS_BYTES {
        return Err(Error::invalid("more LEDs than one channel drives"));
    }
    Ok(())
}

/// An open output channel.
pub struct Channel<P: Platform> {
    platform: P,
    id: ChannelId,
    config: StripConfig,
    window: Option<RegisterWindow<P::Window>>,
    region: Option<DmaRegion<P::Region>>,
    state: ChannelState,
    values: Vec<u8, MAX_BRIGHTNESS_BYTES>,
}

impl<P: Platform> Channel<P> {
    /// Map the channel's registers, start the PWM clock, build the DMA region, and enable the
    /// serializer.
    ///
    /// # Errors
    ///
    /// Any failure from [`RegisterWindow::acquire_channel`], [`clock::configure_shared`], or
    /// [`DmaRegion::build`]. Everything acquired before the failure is released first.
    pub fn open(platform: P, id: ChannelId, config: StripConfig) -> Result<Self> {
        let resources = id.resources();
        let mut window = RegisterWindow::acquire_channel(&platform, id)?;

        let mut delay = platform.delay();
        if let Err(err) = clock::configure_shared(&mut window.clock, &mut delay, &config.clock) {
            warn!("{}: clock setup failed, releasing registers", id);
            window.release(&platform);
            return Err(err);
        }

        let region = match DmaRegion::build(&platform, &resources) {
            Ok(region) => region,
            Err(err) => {
                warn!("{}: DMA region setup failed, releasing registers", id);
                window.release(&platform);
                return Err(err);
            }
        };

        pwm::configure(&mut window.pwm);

        info!("{}: open on DMA engine {}", id, resources.dma_channel);
        Ok(Self {
            platform,
            id,
            config,
            window: Some(window),
            region: Some(region),
            state: ChannelState::Prepared,
            values: Vec::new(),
        })
    }

    /// Which strip this is.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Current state, refreshing [`ChannelState::Transferring`] to [`ChannelState::Idle`] once
    /// the engine has finished.
    pub fn state(&mut self) -> ChannelState {
        if self.state == ChannelState::Transferring
            && let Some(window) = self.window.as_ref()
            && !dma::is_active(&window.dma)
        {
            self.state = ChannelState::Idle;
        }
        self.state
    }

    /// Brightness values of the most recent frame sent.
    #[must_use]
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// The DMA region, while open.
    #[must_use]
    pub const fn region(&self) -> Option<&DmaRegion<P::Region>> {
        self.region.as_ref()
    }

    /// Send one frame.
    ///
    /// Waits for the previous frame to finish, converts `brightness` into the DMA region, and
    /// arms the engine. Returns the number of waveform bytes carrying LED data.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad length, with the channel untouched.
    /// [`Error::HardwareTimeout`] if the previous frame never finishes; the channel stays
    /// [`ChannelState::Transferring`].
    /// [`Error::StateViolation`] after [`close`](Self::close).
    pub fn write(&mut self, brightness: &[u8]) -> Result<usize> {
        validate_frame_len(brightness.len())?;
        self.wait_idle().map_err(|err| retag(err, "write"))?;
        self.load_and_arm(brightness)
    }

    /// Send one frame if the engine is free, without waiting.
    ///
    /// Returns `None` while the previous frame is still streaming; nothing is touched then.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write), except that a busy engine is not an error.
    pub fn try_write(&mut self, brightness: &[u8]) -> Result<Option<usize>> {
        validate_frame_len(brightness.len())?;
        if !self.poll_idle().map_err(|err| retag(err, "write"))? {
            return Ok(None);
        }
        self.load_and_arm(brightness).map(Some)
    }

    /// One non-blocking check of the engine: `true` unless a frame is still streaming.
    ///
    /// # Errors
    ///
    /// [`Error::StateViolation`] after [`close`](Self::close).
    pub fn poll_idle(&mut self) -> Result<bool> {
        let Some(window) = self.window.as_mut() else {
            return Err(Error::state("wait", ChannelState::Closed));
        };
        if dma::poll_idle(&mut window.dma) && self.state == ChannelState::Transferring {
            self.state = ChannelState::Idle;
        }
        Ok(self.state != ChannelState::Transferring)
    }

    /// Block until the engine has finished the current frame.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareTimeout`] if the engine stays active past the configured bound.
    /// [`Error::StateViolation`] after [`close`](Self::close).
    pub fn wait_idle(&mut self) -> Result<()> {
        let Some(window) = self.window.as_mut() else {
            return Err(Error::state("wait", ChannelState::Closed));
        };
        if self.state != ChannelState::Transferring {
            return Ok(());
        }
        let mut delay = self.platform.delay();
        dma::wait_idle(
            &mut window.dma,
            &mut delay,
            self.config.dma_poll_interval_us,
            self.config.dma_max_polls,
        )?;
        self.state = ChannelState::Idle;
        Ok(())
    }

    /// Stop the hardware and release every resource.
    ///
    /// Waits out a frame still streaming, up to the configured bound, then aborts it. Every
    /// release step runs even if the engine has to be aborted.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareTimeout`] if the engine had to be aborted.
    pub fn close(mut self) -> Result<()> {
        let max_polls = self.config.dma_max_polls;
        self.teardown(max_polls)
    }

    /// [`close`](Self::close) without waiting: a frame still streaming is aborted at once.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareTimeout`] if the engine had to be aborted.
    pub fn close_now(mut self) -> Result<()> {
        self.teardown(0)
    }

    /// Convert into the region and arm the engine. The engine must be idle.
    fn load_and_arm(&mut self, brightness: &[u8]) -> Result<usize> {
        let (Some(window), Some(region)) = (self.window.as_mut(), self.region.as_mut()) else {
            return Err(Error::state("write", ChannelState::Closed));
        };

        let written = region.load_frame(brightness)?;
        self.state = ChannelState::Loaded;

        let mut delay = self.platform.delay();
        dma::start(&mut window.dma, &mut delay, region.descriptor_bus_address());
        self.state = ChannelState::Transferring;

        self.values.clear();
        self.values
            .extend_from_slice(brightness)
            .map_err(|()| Error::invalid("more LEDs than one channel drives"))?;

        debug!(
            "{}: armed {} LEDs, {} waveform bytes",
            self.id,
            brightness.len() / PATTERN_LEN,
            written
        );
        Ok(written)
    }

    fn teardown(&mut self, idle_polls: u32) -> Result<()> {
        let mut result = Ok(());
        let mut delay = self.platform.delay();

        if let Some(window) = self.window.as_mut() {
            if self.region.is_some()
                && let Err(err) = dma::wait_idle(
                    &mut window.dma,
                    &mut delay,
                    self.config.dma_poll_interval_us,
                    idle_polls,
                )
            {
                warn!("{}: frame still streaming at close, aborting", self.id);
                if let Err(abort_err) = dma::abort(
                    &mut window.dma,
                    &mut delay,
                    self.config.dma_poll_interval_us,
                    self.config.abort_max_polls,
                ) {
                    error!("{}: {}, region freed after engine reset", self.id, abort_err);
                }
                result = Err(err);
            }
            pwm::stop(&mut window.pwm);
        }

        if let Some(region) = self.region.take() {
            self.platform.free_coherent(region.into_memory());
        }
        if let Some(window) = self.window.take() {
            window.release(&self.platform);
        }

        if self.state != ChannelState::Closed {
            info!("{}: closed", self.id);
        }
        self.state = ChannelState::Closed;
        result
    }
}

/// Report a closed-channel violation under the caller's operation name.
const fn retag(err: Error, operation: &'static str) -> Error {
    match err {
        Error::StateViolation { state, .. } => Error::state(operation, state),
        other => other,
    }
}

impl<P: Platform> Drop for Channel<P> {
    fn drop(&mut self) {
        let max_polls = self.config.dma_max_polls;
        if let Err(err) = self.teardown(max_polls) {
            error!("{}: teardown on drop: {}", self.id, err);
        }
    }
}

impl<P: Platform> core::fmt::Debug for Channel<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("leds", &(self.values.len() / PATTERN_LEN))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_lengths_must_be_whole_leds_within_capacity() {
        assert_eq!(validate_frame_len(0), Ok(()));
        assert_eq!(validate_frame_len(3), Ok(()));
        assert_eq!(validate_frame_len(MAX_BRIGHTNESS_BYTES), Ok(()));
        assert!(validate_frame_len(MAX_BRIGHTNESS_BYTES + 3).is_err());
        assert!(validate_frame_len(4).is_err());
    }
}
