//! PWM channel 1 in serializer mode, fed from the FIFO by DMA requests.
//!
//! In serializer mode the PWM shifts each 32-bit FIFO word out MSB first, one bit per clock
//! tick. The waveform bytes therefore play back at exactly the tick rate set in [`crate::clock`].

use crate::hw::RegisterAccess;
use crate::register_map::pwm::{CTL, DMAC, RNG1, STA, ctl, dmac, sta};

/// Bits shifted out per FIFO word.
pub const SERIALIZER_RANGE: u32 = 32;

/// FIFO level below which the PWM raises a DMA request.
pub const DREQ_THRESHOLD: u32 = 3;

/// FIFO level below which the PWM raises a panic-priority request.
pub const PANIC_THRESHOLD: u32 = 7;

/// Control value while a frame may be streaming.
pub const RUNNING_CTL: u32 = ctl::USEF1 | ctl::MODE1 | ctl::PWEN1;

/// Put channel 1 into FIFO-fed serializer mode with DMA requests enabled.
pub fn configure<W>(window: &mut W)
where
    W: RegisterAccess + ?Sized,
{
    window.write32(CTL, 0);
    window.barrier();
    window.write32(CTL, ctl::CLRF1);
    window.write32(STA, sta::ERRORS);
    window.write32(RNG1, SERIALIZER_RANGE);
    window.write32(
        DMAC,
        dmac::ENAB | dmac::panic(PANIC_THRESHOLD) | dmac::dreq(DREQ_THRESHOLD),
    );
    window.barrier();
    window.write32(CTL, RUNNING_CTL);
    window.barrier();
    debug!("PWM serializer enabled, range {}", SERIALIZER_RANGE);
}

/// Stop the serializer and withdraw DMA requests.
pub fn stop<W>(window: &mut W)
where
    W: RegisterAccess + ?Sized,
{
    window.write32(DMAC, 0);
    window.write32(CTL, 0);
    window.barrier();
    let status = window.read32(STA);
    if status & sta::ERRORS != 0 {
        warn!("PWM stopped with status {:#x}", status);
        window.write32(STA, status & sta::ERRORS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::pwm::BLOCK_LEN;

    struct Block([u32; BLOCK_LEN / 4]);

    impl RegisterAccess for Block {
        fn read32(&self, offset: usize) -> u32 {
            self.0[offset / 4]
        }

        fn write32(&mut self, offset: usize, value: u32) {
            self.0[offset / 4] = value;
        }

        fn barrier(&self) {}
    }

    #[test]
    fn configure_enables_fifo_serializer_with_dma() {
        let mut block = Block([0; BLOCK_LEN / 4]);
        configure(&mut block);
        assert_eq!(block.read32(CTL), ctl::USEF1 | ctl::MODE1 | ctl::PWEN1);
        assert_eq!(block.read32(RNG1), 32);
        assert_eq!(block.read32(DMAC), (1 << 31) | (7 << 8) | 3);
    }

    #[test]
    fn stop_clears_control_and_dma_requests() {
        let mut block = Block([0; BLOCK_LEN / 4]);
        configure(&mut block);
        stop(&mut block);
        assert_eq!(block.read32(CTL), 0);
        assert_eq!(block.read32(DMAC), 0);
    }
}
