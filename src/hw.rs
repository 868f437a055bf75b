//! Hardware access capability: register windows, coherent memory, and delays.
//!
//! The engine never touches device memory directly. A [`Platform`] maps register blocks and
//! allocates DMA-visible memory; everything above it talks to [`RegisterAccess`] and
//! [`CoherentMemory`]. Real platforms hand out [`Mmio`] windows over memory they mapped
//! themselves (ioremap, `/dev/mem`, a bare-metal identity map). Tests hand out software mocks.

use core::ptr::NonNull;
use core::sync::atomic::{Ordering, fence};

use embedded_hal::delay::DelayNs;

use crate::Result;

/// 32-bit register access at byte offsets within one window.
pub trait RegisterAccess {
    /// Read the register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write the register at `offset`.
    fn write32(&mut self, offset: usize, value: u32);

    /// Order all earlier accesses before any later one, as seen by other bus masters.
    fn barrier(&self);
}

/// Memory shared between the CPU and the DMA engines.
///
/// Every store must reach memory in program order and be visible to the DMA engine once
/// [`barrier`](RegisterAccess::barrier) returns.
pub trait CoherentMemory: RegisterAccess {
    /// Address of the first byte as seen by the DMA engine.
    fn bus_address(&self) -> u32;

    /// Size of the allocation in bytes.
    fn len(&self) -> usize;

    /// Whether the allocation is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store one byte.
    fn write8(&mut self, offset: usize, value: u8);
}

/// Source of register windows, coherent memory, and delays.
///
/// Methods take `&self`; implementations that count or cache use interior mutability.
pub trait Platform {
    /// A mapped register block.
    type Window: RegisterAccess;
    /// A coherent allocation.
    type Region: CoherentMemory;
    /// Delay provider used while polling hardware.
    type Delay: DelayNs;

    /// Map `len` bytes of device registers starting at physical address `phys`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ResourceUnavailable`] if the block cannot be mapped.
    fn map(&self, phys: u32, len: usize) -> Result<Self::Window>;

    /// Release a window returned by [`map`](Self::map).
    fn unmap(&self, window: Self::Window);

    /// Allocate `len` zeroed bytes of DMA-coherent memory with a 32-bit bus address.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ResourceUnavailable`] if the allocation fails.
    fn alloc_coherent(&self, len: usize) -> Result<Self::Region>;

    /// Free memory returned by [`alloc_coherent`](Self::alloc_coherent).
    fn free_coherent(&self, region: Self::Region);

    /// A delay provider for one polling loop.
    fn delay(&self) -> Self::Delay;
}

impl<T: Platform + ?Sized> Platform for &T {
    type Window = T::Window;
    type Region = T::Region;
    type Delay = T::Delay;

    fn map(&self, phys: u32, len: usize) -> Result<Self::Window> {
        (**self).map(phys, len)
    }

    fn unmap(&self, window: Self::Window) {
        (**self).unmap(window);
    }

    fn alloc_coherent(&self, len: usize) -> Result<Self::Region> {
        (**self).alloc_coherent(len)
    }

    fn free_coherent(&self, region: Self::Region) {
        (**self).free_coherent(region);
    }

    fn delay(&self) -> Self::Delay {
        (**self).delay()
    }
}

// ============================================================================
// Volatile implementation over mapped memory
// ============================================================================

/// A window of memory-mapped I/O accessed with volatile loads and stores.
///
/// An out-of-range or misaligned offset is a driver bug: it panics in debug builds. Release
/// builds skip the access, and such a read returns zero.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u8>,
    len: usize,
}

#[expect(unsafe_code, reason = "the pointer is owned by this window alone")]
// SAFETY: `Mmio` is the only handle to its mapping; moving it between threads moves that ownership.
unsafe impl Send for Mmio {}

impl Mmio {
    /// Wrap `len` bytes of mapped device memory starting at `base`.
    ///
    /// Returns `None` for a null `base` or a `base` that is not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// `base..base + len` must stay mapped, readable, and writable for the lifetime of the
    /// returned value, and nothing else may create a Rust reference into it.
    #[expect(unsafe_code, reason = "caller vouches for the mapping")]
    #[must_use]
    pub unsafe fn new(base: *mut u8, len: usize) -> Option<Self> {
        let base = NonNull::new(base)?;
        if base.as_ptr().addr() % 4 != 0 {
            return None;
        }
        Some(Self { base, len })
    }

    /// Size of the window in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped base pointer, for handing back to whoever mapped it.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn word_in_range(&self, offset: usize) -> bool {
        let in_range = offset % 4 == 0 && offset.checked_add(4).is_some_and(|end| end <= self.len);
        debug_assert!(
            in_range,
            "word {offset:#x} misaligned or outside {:#x}-byte window",
            self.len
        );
        in_range
    }

    /// Store one byte with a volatile write.
    #[expect(unsafe_code, reason = "volatile store inside the mapped range")]
    pub fn write8(&mut self, offset: usize, value: u8) {
        debug_assert!(offset < self.len, "byte {offset:#x} outside {:#x}-byte window", self.len);
        if offset >= self.len {
            return;
        }
        // SAFETY: `offset < len` and the constructor's contract covers `base..base + len`.
        unsafe {
            self.base.as_ptr().add(offset).write_volatile(value);
        }
    }
}

impl RegisterAccess for Mmio {
    #[expect(unsafe_code, reason = "volatile load inside the mapped range")]
    fn read32(&self, offset: usize) -> u32 {
        if !self.word_in_range(offset) {
            return 0;
        }
        // SAFETY: aligned, in range, and covered by the constructor's contract.
        unsafe {
            self.base.as_ptr().add(offset).cast::<u32>().read_volatile()
        }
    }

    #[expect(unsafe_code, reason = "volatile store inside the mapped range")]
    fn write32(&mut self, offset: usize, value: u32) {
        if !self.word_in_range(offset) {
            return;
        }
        // SAFETY: aligned, in range, and covered by the constructor's contract.
        unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
    }

    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }
}

/// Coherent memory backed by an [`Mmio`] mapping and its bus address.
#[derive(Debug)]
pub struct CoherentRegion {
    memory: Mmio,
    bus_address: u32,
}

impl CoherentRegion {
    /// Pair a CPU mapping of coherent memory with the address the DMA engine uses for it.
    #[must_use]
    pub const fn new(memory: Mmio, bus_address: u32) -> Self {
        Self {
            memory,
            bus_address,
        }
    }

    /// Give back the CPU mapping, for freeing.
    #[must_use]
    pub fn into_inner(self) -> Mmio {
        self.memory
    }
}

impl RegisterAccess for CoherentRegion {
    fn read32(&self, offset: usize) -> u32 {
        self.memory.read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.memory.write32(offset, value);
    }

    fn barrier(&self) {
        self.memory.barrier();
    }
}

impl CoherentMemory for CoherentRegion {
    fn bus_address(&self) -> u32 {
        self.bus_address
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn write8(&mut self, offset: usize, value: u8) {
        self.memory.write8(offset, value);
    }
}
