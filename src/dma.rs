//! DMA transfer descriptor, the coherent region that carries it, and engine control.
//!
//! One coherent allocation per channel holds a single control block followed by the waveform
//! buffer:
//!
//! ```text
//! offset 0        32                                   32 + 2700              32 + 2788
//!        +--------+-------------------------------------+----------------------+
//!        | CB     | frame data (3 bytes per brightness) | reset pulse (zeros)  |
//!        +--------+-------------------------------------+----------------------+
//! ```
//!
//! Every field of the control block is fixed when the region is built. A frame only rewrites
//! the waveform bytes and re-arms the engine with the same descriptor address.

use embedded_hal::delay::DelayNs;

use crate::config::{ChannelResources, MAX_FRAME_BYTES, WAVEFORM_BUFFER_BYTES};
use crate::error::{Resource, WaitOperation};
use crate::hw::{CoherentMemory, Platform, RegisterAccess};
use crate::register_map::dma::{
    CONBLK_AD, CONTROL_BLOCK_ALIGN, CONTROL_BLOCK_LEN, CS, DEBUG, cs, debug, ti,
};
use crate::waveform::{self, PATTERN_LEN, WaveformSink};
use crate::{Error, Result};

/// Byte offset of the control block within the region.
pub const DESCRIPTOR_OFFSET: usize = 0;

/// Byte offset of the waveform buffer within the region.
pub const DATA_OFFSET: usize = DESCRIPTOR_OFFSET + CONTROL_BLOCK_LEN;

/// Size of the coherent allocation.
pub const REGION_LEN: usize = DATA_OFFSET + WAVEFORM_BUFFER_BYTES;

/// Engine priority for both normal and panic requests.
pub const ENGINE_PRIORITY: u32 = 15;

const WORD: usize = 4;

// ============================================================================
// Control block
// ============================================================================

/// One hardware transfer descriptor, as the engine reads it from memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlBlock {
    /// Transfer information.
    pub ti: u32,
    /// Source bus address.
    pub source_ad: u32,
    /// Destination bus address.
    pub dest_ad: u32,
    /// Bytes to move.
    pub txfr_len: u32,
    /// 2D stride, unused.
    pub stride: u32,
    /// Next control block bus address, zero to stop.
    pub next_cb: u32,
}

/// Transfer information for 32-bit, DREQ-paced writes into a peripheral FIFO.
#[must_use]
pub const fn transfer_info(dreq: u8) -> u32 {
    ti::NO_WIDE_BURSTS | ti::WAIT_RESP | ti::DEST_DREQ | ti::permap(dreq as u32) | ti::SRC_INC
}

impl ControlBlock {
    /// Single-shot transfer of the whole waveform buffer at `source_bus` into the PWM FIFO.
    #[must_use]
    pub const fn for_pwm(source_bus: u32, resources: &ChannelResources) -> Self {
        Self {
            ti: transfer_info(resources.dreq),
            source_ad: source_bus,
            dest_ad: resources.pwm_fifo_bus(),
            txfr_len: WAVEFORM_BUFFER_BYTES as u32,
            stride: 0,
            next_cb: 0,
        }
    }

    /// Memory image, including the two reserved words.
    #[must_use]
    pub const fn words(&self) -> [u32; CONTROL_BLOCK_LEN / WORD] {
        [
            self.ti,
            self.source_ad,
            self.dest_ad,
            self.txfr_len,
            self.stride,
            self.next_cb,
            0,
            0,
        ]
    }

    /// Decode a memory image.
    #[must_use]
    pub const fn from_words(words: [u32; CONTROL_BLOCK_LEN / WORD]) -> Self {
        Self {
            ti: words[0],
            source_ad: words[1],
            dest_ad: words[2],
            txfr_len: words[3],
            stride: words[4],
            next_cb: words[5],
        }
    }
}

// ============================================================================
// Coherent region
// ============================================================================

/// Coherent memory holding one control block and a full-frame waveform buffer.
#[derive(Debug)]
pub struct DmaRegion<R> {
    memory: R,
}

impl<R: CoherentMemory> DmaRegion<R> {
    /// Allocate and zero the region, then write the descriptor for `resources`.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceUnavailable`] with [`Resource::DmaMemory`] if the allocation fails or
    /// comes back too small or misaligned for a control block. A rejected allocation is freed.
    pub fn build<P>(platform: &P, resources: &ChannelResources) -> Result<Self>
    where
        P: Platform<Region = R> + ?Sized,
    {
        let memory = platform.alloc_coherent(REGION_LEN).map_err(|err| {
            warn!("coherent allocation of {} bytes failed: {}", REGION_LEN, err);
            Error::unavailable(Resource::DmaMemory)
        })?;

        let bus = memory.bus_address();
        let source_bus = u32::try_from(DATA_OFFSET)
            .ok()
            .and_then(|offset| bus.checked_add(offset));
        let fits = u32::try_from(REGION_LEN)
            .ok()
            .and_then(|len| bus.checked_add(len))
            .is_some();
        let source_bus = match source_bus {
            Some(source_bus)
                if fits
                    && memory.len() >= REGION_LEN
                    && bus as usize % CONTROL_BLOCK_ALIGN == 0 =>
            {
                source_bus
            }
            _ => {
                error!(
                    "coherent region at {:#x} ({} bytes) cannot hold a control block",
                    bus,
                    memory.len()
                );
                platform.free_coherent(memory);
                return Err(Error::unavailable(Resource::DmaMemory));
            }
        };

        let mut region = Self { memory };
        for offset in (0..REGION_LEN).step_by(WORD) {
            region.memory.write32(offset, 0);
        }
        let block = ControlBlock::for_pwm(source_bus, resources);
        for (index, word) in block.words().into_iter().enumerate() {
            region.memory.write32(DESCRIPTOR_OFFSET + index * WORD, word);
        }
        region.memory.barrier();

        debug!(
            "DMA region at bus {:#x}, {} bytes, engine {}",
            bus, REGION_LEN, resources.dma_channel
        );
        Ok(region)
    }

    /// Bus address the engine loads the control block from.
    #[must_use]
    pub fn descriptor_bus_address(&self) -> u32 {
        self.memory.bus_address()
    }

    /// The control block as it currently sits in memory.
    #[must_use]
    pub fn control_block(&self) -> ControlBlock {
        let words =
            core::array::from_fn(|index| self.memory.read32(DESCRIPTOR_OFFSET + index * WORD));
        ControlBlock::from_words(words)
    }

    /// Convert `brightness` into the waveform buffer and zero everything after it.
    ///
    /// Returns the bytes of waveform written, excluding the zeroed tail.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the frame does not fit. The buffer is left untouched.
    pub fn load_frame(&mut self, brightness: &[u8]) -> Result<usize> {
        let written = waveform::convert(
            &mut SwappedSink {
                memory: &mut self.memory,
            },
            brightness,
        )?;

        // Finish the partially filled word byte by byte, then clear whole words.
        let aligned = written.next_multiple_of(WORD);
        for index in written..aligned {
            self.memory.write8(DATA_OFFSET + (index ^ 3), 0);
        }
        for offset in (aligned..WAVEFORM_BUFFER_BYTES).step_by(WORD) {
            self.memory.write32(DATA_OFFSET + offset, 0);
        }
        self.memory.barrier();
        Ok(written)
    }

    /// The underlying allocation.
    #[must_use]
    pub const fn memory(&self) -> &R {
        &self.memory
    }

    /// Give back the allocation, for freeing.
    #[must_use]
    pub fn into_memory(self) -> R {
        self.memory
    }
}

/// Writes patterns so the serializer emits them in logical order.
///
/// The engine reads little-endian words and the PWM shifts each word MSB first, so logical byte
/// `i` is stored at `i ^ 3`.
struct SwappedSink<'a, R> {
    memory: &'a mut R,
}

impl<R: CoherentMemory> WaveformSink for SwappedSink<'_, R> {
    fn capacity(&self) -> usize {
        MAX_FRAME_BYTES
    }

    fn write_pattern(&mut self, offset: usize, pattern: [u8; PATTERN_LEN]) {
        for (index, byte) in pattern.into_iter().enumerate() {
            self.memory.write8(DATA_OFFSET + ((offset + index) ^ 3), byte);
        }
    }
}

// ============================================================================
// Engine control
// ============================================================================

/// Reset the engine and start it on the control block at `descriptor_bus`.
pub fn start<W, D>(window: &mut W, delay: &mut D, descriptor_bus: u32)
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    window.write32(CS, cs::RESET);
    window.barrier();
    delay.delay_us(1);
    window.write32(CS, cs::INT | cs::END);
    window.write32(DEBUG, debug::ERRORS);
    window.write32(CONBLK_AD, descriptor_bus);
    window.barrier();
    window.write32(
        CS,
        cs::WAIT_FOR_OUTSTANDING_WRITES
            | cs::panic_priority(ENGINE_PRIORITY)
            | cs::priority(ENGINE_PRIORITY)
            | cs::ACTIVE,
    );
    window.barrier();
}

/// Whether the engine is still working through a control block.
pub fn is_active<W>(window: &W) -> bool
where
    W: RegisterAccess + ?Sized,
{
    window.read32(CS) & cs::ACTIVE != 0
}

/// One non-blocking check: `true` once the engine is inactive.
///
/// An engine error flag left by the finished frame is logged with the debug register and
/// cleared.
pub fn poll_idle<W>(window: &mut W) -> bool
where
    W: RegisterAccess + ?Sized,
{
    if is_active(window) {
        return false;
    }
    clear_errors(window);
    true
}

/// Poll until the engine is inactive, at most `max_polls` times.
///
/// An engine error flag is logged with the debug register and cleared; it does not fail the wait.
///
/// # Errors
///
/// [`Error::HardwareTimeout`] with [`WaitOperation::DmaIdle`] if the engine stays active.
pub fn wait_idle<W, D>(
    window: &mut W,
    delay: &mut D,
    poll_interval_us: u32,
    max_polls: u32,
) -> Result<()>
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    for _ in 0..max_polls {
        if poll_idle(window) {
            return Ok(());
        }
        delay.delay_us(poll_interval_us);
    }
    if poll_idle(window) {
        return Ok(());
    }
    warn!("DMA engine still active after {} polls", max_polls);
    Err(Error::timeout(WaitOperation::DmaIdle))
}

/// Abandon the current transfer and reset the engine.
///
/// The engine is reset even if it never reports inactive.
///
/// # Errors
///
/// [`Error::HardwareTimeout`] with [`WaitOperation::DmaIdle`] if the abort did not settle.
pub fn abort<W, D>(
    window: &mut W,
    delay: &mut D,
    poll_interval_us: u32,
    max_polls: u32,
) -> Result<()>
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    window.write32(CS, cs::ABORT);
    window.barrier();
    let settled = wait_idle(window, delay, poll_interval_us, max_polls);
    window.write32(CS, cs::RESET);
    window.barrier();
    if settled.is_err() {
        error!("DMA abort did not settle, engine reset anyway");
    }
    settled
}

fn clear_errors<W>(window: &mut W)
where
    W: RegisterAccess + ?Sized,
{
    let status = window.read32(CS);
    if status & cs::ERROR != 0 {
        let debug_flags = window.read32(DEBUG);
        error!("DMA engine error, CS {:#x} DEBUG {:#x}", status, debug_flags);
        window.write32(DEBUG, debug_flags & debug::ERRORS);
    }
}
