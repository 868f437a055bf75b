//! Channel registry: one slot per strip, indexed by channel id.
//!
//! Each slot sits behind a blocking mutex, so two callers cannot load the same waveform buffer
//! at once. The mutex is held only for short register and buffer work. Waiting for a frame to
//! finish polls the engine with the slot released between polls, and opening runs with the slot
//! reserved but unlocked, so a slow strip never keeps the lock (and, on bare metal, interrupts
//! masked) for a whole bounded wait.
//!
//! ```no_run
//! # use led_strip_dma::hw::Platform;
//! # fn demo<P: Platform + Clone>(platform: P) -> led_strip_dma::Result<()> {
//! use led_strip_dma::registry::Registry;
//! use smart_leds::{RGB8, SmartLedsWrite};
//!
//! let registry = Registry::new(platform);
//! registry.open(0)?;
//! registry.write_command(0, "[{255,0,0}{0,255,0}{0,0,255}]")?;
//!
//! let mut strip = registry.strip(0)?;
//! strip.write([RGB8::new(8, 8, 8); 300])?;
//! registry.close(0)?;
//! # Ok(())
//! # }
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::delay::DelayNs;
use heapless::Vec;
use smart_leds::{RGB8, SmartLedsWrite};

use crate::channel::{Channel, ChannelState};
use crate::config::{CHANNEL_COUNT, ChannelId, MAX_BRIGHTNESS_BYTES, StripConfig};
use crate::error::WaitOperation;
use crate::hw::Platform;
use crate::{Error, Result, command};

enum Entry<P: Platform> {
    Closed,
    /// Reserved by an `open` that is still acquiring hardware.
    Opening,
    Open(Channel<P>),
}

type Slot<P> = Mutex<CriticalSectionRawMutex, RefCell<Entry<P>>>;

/// Owns every channel and the platform they run on.
pub struct Registry<P: Platform> {
    platform: P,
    config: StripConfig,
    slots: [Slot<P>; CHANNEL_COUNT],
}

impl<P: Platform + Clone> Registry<P> {
    /// A registry with every channel closed and the default [`StripConfig`].
    #[must_use]
    pub fn new(platform: P) -> Self {
        Self::with_config(platform, StripConfig::DEFAULT)
    }

    /// A registry with every channel closed.
    #[must_use]
    pub fn with_config(platform: P, config: StripConfig) -> Self {
        Self {
            platform,
            config,
            slots: core::array::from_fn(|_| Mutex::new(RefCell::new(Entry::Closed))),
        }
    }

    /// Settings every channel opens with.
    #[must_use]
    pub const fn config(&self) -> &StripConfig {
        &self.config
    }

    /// Open channel `raw_id`: map its registers, start the clock, and build its DMA region.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unknown id, [`Error::StateViolation`] if the channel is
    /// already open (or being opened by another caller, reported as
    /// [`ChannelState::Prepared`]), or any failure from [`Channel::open`] (fully rolled back).
    pub fn open(&self, raw_id: u8) -> Result<()> {
        let id = ChannelId::try_from(raw_id)?;
        self.slot(id).lock(|cell| {
            let mut entry = cell.borrow_mut();
            if let Entry::Open(channel) = &mut *entry {
                return Err(Error::state("open", channel.state()));
            }
            if matches!(*entry, Entry::Opening) {
                return Err(Error::state("open", ChannelState::Prepared));
            }
            *entry = Entry::Opening;
            Ok(())
        })?;

        let opened = Channel::open(self.platform.clone(), id, self.config);
        self.slot(id).lock(|cell| match opened {
            Ok(channel) => {
                *cell.borrow_mut() = Entry::Open(channel);
                Ok(())
            }
            Err(err) => {
                *cell.borrow_mut() = Entry::Closed;
                Err(err)
            }
        })
    }

    /// Send brightness bytes (`r, g, b` per LED) to channel `raw_id`.
    ///
    /// Returns the number of waveform bytes carrying LED data.
    ///
    /// # Errors
    ///
    /// See [`Channel::write`]; [`Error::StateViolation`] if the channel is closed.
    pub fn write(&self, raw_id: u8, brightness: &[u8]) -> Result<usize> {
        let id = ChannelId::try_from(raw_id)?;
        self.write_channel(id, brightness)
    }

    /// Parse a `[{r,g,b}…]` command and send it to channel `raw_id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a malformed command, otherwise as [`write`](Self::write).
    pub fn write_command(&self, raw_id: u8, text: &str) -> Result<usize> {
        let id = ChannelId::try_from(raw_id)?;
        let brightness = command::parse(text)?;
        self.write_channel(id, &brightness)
    }

    /// Block until channel `raw_id` has finished its current frame.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareTimeout`] past the configured bound, [`Error::StateViolation`] if the
    /// channel is closed.
    pub fn wait_idle(&self, raw_id: u8) -> Result<()> {
        let id = ChannelId::try_from(raw_id)?;
        self.poll_open(id, "wait", |channel| Ok(channel.poll_idle()?.then_some(())))
    }

    /// Lifecycle state of channel `raw_id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unknown id.
    pub fn state(&self, raw_id: u8) -> Result<ChannelState> {
        let id = ChannelId::try_from(raw_id)?;
        Ok(self.slot(id).lock(|cell| match &mut *cell.borrow_mut() {
            Entry::Open(channel) => channel.state(),
            Entry::Closed | Entry::Opening => ChannelState::Closed,
        }))
    }

    /// Copy the brightness bytes of the last frame sent on channel `raw_id` into `out`.
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `out` is too small, [`Error::StateViolation`] if the
    /// channel is closed.
    pub fn read_values(&self, raw_id: u8, out: &mut [u8]) -> Result<usize> {
        let id = ChannelId::try_from(raw_id)?;
        self.with_open(id, "read", |channel| {
            let values = channel.values();
            let target = out
                .get_mut(..values.len())
                .ok_or(Error::invalid("output buffer smaller than last frame"))?;
            target.copy_from_slice(values);
            Ok(values.len())
        })
    }

    /// Stop channel `raw_id` and release its hardware.
    ///
    /// A frame still streaming is waited out, up to the configured bound, then aborted. The
    /// channel is closed afterwards even if this returns an error.
    ///
    /// # Errors
    ///
    /// [`Error::StateViolation`] if already closed, [`Error::HardwareTimeout`] if the engine had
    /// to be aborted.
    pub fn close(&self, raw_id: u8) -> Result<()> {
        let id = ChannelId::try_from(raw_id)?;
        let drained =
            self.poll_open(id, "close", |channel| Ok(channel.poll_idle()?.then_some(())));
        if let Err(err @ Error::StateViolation { .. }) = drained {
            return Err(err);
        }
        self.slot(id).lock(|cell| {
            let mut entry = cell.borrow_mut();
            match core::mem::replace(&mut *entry, Entry::Closed) {
                Entry::Open(channel) => channel.close_now(),
                other => {
                    *entry = other;
                    Err(Error::state("close", ChannelState::Closed))
                }
            }
        })
    }

    /// A [`SmartLedsWrite`] handle for channel `raw_id`.
    ///
    /// The channel must be opened before writing through the handle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unknown id.
    pub fn strip(&self, raw_id: u8) -> Result<Strip<'_, P>> {
        let id = ChannelId::try_from(raw_id)?;
        Ok(Strip { registry: self, id })
    }

    fn write_channel(&self, id: ChannelId, brightness: &[u8]) -> Result<usize> {
        self.poll_open(id, "write", |channel| channel.try_write(brightness))
    }

    /// Retry `attempt` under the slot lock until it returns `Some`, sleeping between attempts
    /// with the lock released. Gives up after the DMA polling bound.
    fn poll_open<T>(
        &self,
        id: ChannelId,
        operation: &'static str,
        mut attempt: impl FnMut(&mut Channel<P>) -> Result<Option<T>>,
    ) -> Result<T> {
        let mut delay = self.platform.delay();
        let mut polls = 0;
        loop {
            if let Some(done) = self.with_open(id, operation, &mut attempt)? {
                return Ok(done);
            }
            if polls >= self.config.dma_max_polls {
                warn!("{}: DMA engine still active after {} polls", id, polls);
                return Err(Error::timeout(WaitOperation::DmaIdle));
            }
            delay.delay_us(self.config.dma_poll_interval_us);
            polls += 1;
        }
    }

    fn with_open<T>(
        &self,
        id: ChannelId,
        operation: &'static str,
        f: impl FnOnce(&mut Channel<P>) -> Result<T>,
    ) -> Result<T> {
        self.slot(id).lock(|cell| {
            let mut entry = cell.borrow_mut();
            let Entry::Open(channel) = &mut *entry else {
                return Err(Error::state(operation, ChannelState::Closed));
            };
            f(channel)
        })
    }

    const fn slot(&self, id: ChannelId) -> &Slot<P> {
        match id {
            ChannelId::Strip0 => &self.slots[0],
            ChannelId::Strip1 => &self.slots[1],
        }
    }
}

impl<P: Platform> core::fmt::Debug for Registry<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Writes [`RGB8`] pixels to one channel of a [`Registry`].
#[derive(Debug)]
pub struct Strip<'r, P: Platform> {
    registry: &'r Registry<P>,
    id: ChannelId,
}

impl<P: Platform> Strip<'_, P> {
    /// The channel this handle writes to.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }
}

impl<P: Platform + Clone> SmartLedsWrite for Strip<'_, P> {
    type Error = Error;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let mut brightness: Vec<u8, MAX_BRIGHTNESS_BYTES> = Vec::new();
        for pixel in iterator {
            let RGB8 { r, g, b } = pixel.into();
            brightness
                .extend_from_slice(&[r, g, b])
                .map_err(|()| Error::invalid("more LEDs than one channel drives"))?;
        }
        self.registry.write_channel(self.id, &brightness).map(|_| ())
    }
}
