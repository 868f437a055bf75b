//! Acquire and release the PWM, clock-manager, and DMA register windows of one channel.
//!
//! Windows are mapped as a group in a fixed order (PWM, clock, DMA) and released in the reverse
//! order. A failure partway through unmaps whatever was already mapped before returning.

use crate::config::ChannelId;
use crate::error::Resource;
use crate::hw::Platform;
use crate::register_map::{clock, dma, pwm};
use crate::{Error, Result};

/// The three register windows a channel drives.
#[derive(Debug)]
pub struct RegisterWindow<W> {
    /// PWM controller block.
    pub pwm: W,
    /// Clock-manager PWM control block.
    pub clock: W,
    /// DMA engine block.
    pub dma: W,
}

impl<W> RegisterWindow<W> {
    /// Map every window for `raw_id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unknown channel id, before anything is mapped.
    /// [`Error::ResourceUnavailable`] naming the window that failed; nothing stays mapped.
    pub fn acquire<P>(platform: &P, raw_id: u8) -> Result<Self>
    where
        P: Platform<Window = W> + ?Sized,
    {
        let id = ChannelId::try_from(raw_id)?;
        Self::acquire_channel(platform, id)
    }

    /// Map every window for a known channel.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceUnavailable`] naming the window that failed; nothing stays mapped.
    pub fn acquire_channel<P>(platform: &P, id: ChannelId) -> Result<Self>
    where
        P: Platform<Window = W> + ?Sized,
    {
        let resources = id.resources();
        let dma_phys = resources.dma_phys()?;

        let pwm = map_one(platform, resources.pwm_phys, pwm::BLOCK_LEN, Resource::PwmWindow)?;

        let clock = match map_one(
            platform,
            resources.clock_phys,
            clock::BLOCK_LEN,
            Resource::ClockWindow,
        ) {
            Ok(clock) => clock,
            Err(err) => {
                platform.unmap(pwm);
                return Err(err);
            }
        };

        let dma = match map_one(platform, dma_phys, dma::BLOCK_LEN, Resource::DmaWindow) {
            Ok(dma) => dma,
            Err(err) => {
                platform.unmap(clock);
                platform.unmap(pwm);
                return Err(err);
            }
        };

        debug!("{}: register windows mapped", id);
        Ok(Self { pwm, clock, dma })
    }

    /// Unmap every window, DMA first.
    pub fn release<P>(self, platform: &P)
    where
        P: Platform<Window = W> + ?Sized,
    {
        let Self { pwm, clock, dma } = self;
        platform.unmap(dma);
        platform.unmap(clock);
        platform.unmap(pwm);
    }
}

fn map_one<P>(platform: &P, phys: u32, len: usize, resource: Resource) -> Result<P::Window>
where
    P: Platform + ?Sized,
{
    platform.map(phys, len).map_err(|err| {
        warn!("failed to map {} at {:#x}: {}", resource, phys, err);
        Error::unavailable(resource)
    })
}
