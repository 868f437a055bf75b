//! Software stand-in for the BCM2711 clock manager, PWM blocks, DMA engines, and coherent
//! memory.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use led_strip_dma::hw::{CoherentMemory, Platform, RegisterAccess};
use led_strip_dma::register_map::{clock, dma};
use led_strip_dma::{ChannelId, Error, Resource, Result, StripConfig};

/// Bus address of the first coherent allocation.
pub const FIRST_REGION_BUS: u32 = 0xC000_0000;
const REGION_BUS_STRIDE: u32 = 0x1_0000;

type DelayHook = Box<dyn FnMut()>;

#[derive(Default)]
struct Inner {
    registers: HashMap<u32, u32>,
    regions: HashMap<u32, Vec<u8>>,
    next_bus: u32,
    map_calls: usize,
    maps: usize,
    unmaps: usize,
    allocs: usize,
    frees: usize,
    fail_map_at: Option<usize>,
    fail_alloc: bool,
    clock_unresponsive: bool,
    dma_stuck: bool,
    dma_error: u32,
    abort_ignored: bool,
    clock_stops: usize,
    dma_arms: usize,
    dma_aborts: usize,
    dma_resets: usize,
    delayed_ns: u64,
    delay_hook: Option<DelayHook>,
}

impl Inner {
    fn is_clock_ctl(address: u32) -> bool {
        address == clock_phys() + clock::CTL as u32
    }

    fn is_clock_div(address: u32) -> bool {
        address == clock_phys() + clock::DIV as u32
    }

    fn dma_base(address: u32) -> Option<u32> {
        ChannelId::ALL
            .iter()
            .filter_map(|id| id.resources().dma_phys().ok())
            .find(|&base| (base..base + dma::BLOCK_LEN as u32).contains(&address))
    }

    fn read(&self, address: u32) -> u32 {
        let stored = self.registers.get(&address).copied().unwrap_or(0);
        if Self::is_clock_ctl(address) {
            let running = stored & clock::ctl::ENAB != 0;
            if self.clock_unresponsive || running {
                return stored | clock::ctl::BUSY;
            }
        }
        // CS.ERROR mirrors the DEBUG error flags.
        if let Some(base) = Self::dma_base(address)
            && address == base + dma::CS as u32
            && self.read(base + dma::DEBUG as u32) & dma::debug::ERRORS != 0
        {
            return stored | dma::cs::ERROR;
        }
        stored
    }

    fn write(&mut self, address: u32, value: u32) {
        if Self::is_clock_ctl(address) || Self::is_clock_div(address) {
            // The real clock manager drops writes without the password.
            if value & 0xff00_0000 == clock::PASSWD {
                if Self::is_clock_ctl(address) && value & clock::ctl::ENAB == 0 {
                    self.clock_stops += 1;
                }
                self.registers.insert(address, value & 0x00ff_ffff);
            }
            return;
        }
        if let Some(base) = Self::dma_base(address) {
            match (address - base) as usize {
                dma::CS => self.write_dma_cs(address, value),
                dma::DEBUG => {
                    let flags = self.read(address) & !value;
                    self.registers.insert(address, flags);
                }
                _ => {
                    self.registers.insert(address, value);
                }
            }
            return;
        }
        self.registers.insert(address, value);
    }

    fn write_dma_cs(&mut self, address: u32, value: u32) {
        let mut cs = self.registers.get(&address).copied().unwrap_or(0);
        if value & dma::cs::RESET != 0 {
            self.dma_resets += 1;
            cs = 0;
        }
        if value & dma::cs::ABORT != 0 {
            self.dma_aborts += 1;
            if !self.abort_ignored {
                cs &= !dma::cs::ACTIVE;
            }
        }
        cs &= !(value & (dma::cs::INT | dma::cs::END));
        if value & dma::cs::ACTIVE != 0 {
            self.dma_arms += 1;
            if self.dma_stuck {
                cs |= dma::cs::ACTIVE;
            } else {
                cs = (cs & !dma::cs::ACTIVE) | dma::cs::END;
                self.raise_dma_error(address);
            }
        }
        self.registers.insert(address, cs);
    }

    /// Latch the configured error flags into `DEBUG` for the engine whose `CS` is at `cs`.
    fn raise_dma_error(&mut self, cs: u32) {
        if self.dma_error != 0 {
            let debug = cs - dma::CS as u32 + dma::DEBUG as u32;
            let flags = self.read(debug) | self.dma_error;
            self.registers.insert(debug, flags);
        }
    }
}

fn clock_phys() -> u32 {
    ChannelId::Strip0.resources().clock_phys
}

/// Physical address of a channel's DMA engine registers.
pub fn dma_phys(id: ChannelId) -> u32 {
    id.resources().dma_phys().unwrap()
}

/// Mock platform. Clones share the same hardware.
#[derive(Clone)]
pub struct MockHardware {
    inner: Rc<RefCell<Inner>>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                next_bus: FIRST_REGION_BUS,
                ..Inner::default()
            })),
        }
    }

    /// Make the `n`-th map call (1-based, counted from now on) fail.
    pub fn fail_map_call(&self, n: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.fail_map_at = Some(inner.map_calls + n);
    }

    pub fn fail_alloc(&self, fail: bool) {
        self.inner.borrow_mut().fail_alloc = fail;
    }

    /// A clock that never drops or raises BUSY as asked.
    pub fn set_clock_unresponsive(&self, unresponsive: bool) {
        self.inner.borrow_mut().clock_unresponsive = unresponsive;
    }

    /// Armed engines stay active until [`complete_dma`](Self::complete_dma).
    pub fn set_dma_stuck(&self, stuck: bool) {
        self.inner.borrow_mut().dma_stuck = stuck;
    }

    /// Frames finish with these `DEBUG` error flags raised.
    pub fn set_dma_error(&self, flags: u32) {
        self.inner.borrow_mut().dma_error = flags;
    }

    /// `ABORT` leaves the engine active; only `RESET` stops it.
    pub fn set_abort_ignored(&self, ignored: bool) {
        self.inner.borrow_mut().abort_ignored = ignored;
    }

    /// Run `hook` on every delay, with no mock state borrowed.
    pub fn on_delay(&self, hook: impl FnMut() + 'static) {
        self.inner.borrow_mut().delay_hook = Some(Box::new(hook));
    }

    pub fn clear_delay_hook(&self) {
        self.inner.borrow_mut().delay_hook = None;
    }

    /// Finish every active transfer.
    pub fn complete_dma(&self) {
        let mut inner = self.inner.borrow_mut();
        for id in ChannelId::ALL {
            let address = dma_phys(id) + dma::CS as u32;
            let cs = inner.registers.get(&address).copied().unwrap_or(0);
            if cs & dma::cs::ACTIVE != 0 {
                inner
                    .registers
                    .insert(address, (cs & !dma::cs::ACTIVE) | dma::cs::END);
                inner.raise_dma_error(address);
            }
        }
    }

    pub fn map_calls(&self) -> usize {
        self.inner.borrow().map_calls
    }

    pub fn maps(&self) -> usize {
        self.inner.borrow().maps
    }

    pub fn unmaps(&self) -> usize {
        self.inner.borrow().unmaps
    }

    pub fn allocs(&self) -> usize {
        self.inner.borrow().allocs
    }

    pub fn frees(&self) -> usize {
        self.inner.borrow().frees
    }

    pub fn live_windows(&self) -> usize {
        let inner = self.inner.borrow();
        inner.maps - inner.unmaps
    }

    pub fn live_regions(&self) -> usize {
        self.inner.borrow().regions.len()
    }

    pub fn dma_arms(&self) -> usize {
        self.inner.borrow().dma_arms
    }

    pub fn dma_aborts(&self) -> usize {
        self.inner.borrow().dma_aborts
    }

    pub fn dma_resets(&self) -> usize {
        self.inner.borrow().dma_resets
    }

    /// Writes that left the PWM clock disabled.
    pub fn clock_stops(&self) -> usize {
        self.inner.borrow().clock_stops
    }

    pub fn delayed_ns(&self) -> u64 {
        self.inner.borrow().delayed_ns
    }

    /// Stored value of the register at `phys`, as software last left it.
    pub fn register(&self, phys: u32) -> u32 {
        self.inner.borrow().read(phys)
    }

    /// Contents of the live region at `bus`.
    pub fn region_bytes(&self, bus: u32) -> Vec<u8> {
        self.inner.borrow().regions[&bus].clone()
    }

    /// Little-endian word of the live region at `bus`, as the DMA engine would read it.
    pub fn region_word(&self, bus: u32, offset: usize) -> u32 {
        let bytes = self.region_bytes(bus);
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }
}

/// Polling bounds small enough to keep timeouts fast.
pub fn fast_config() -> StripConfig {
    let mut config = StripConfig::DEFAULT;
    config.clock.max_polls = 20;
    config.clock.poll_interval_us = 10;
    config.dma_max_polls = 20;
    config.dma_poll_interval_us = 10;
    config.abort_max_polls = 5;
    config
}

pub struct MockWindow {
    base: u32,
    len: usize,
    inner: Rc<RefCell<Inner>>,
}

impl RegisterAccess for MockWindow {
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.len, "read past window at {offset:#x}");
        self.inner.borrow().read(self.base + offset as u32)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.len, "write past window at {offset:#x}");
        self.inner.borrow_mut().write(self.base + offset as u32, value);
    }

    fn barrier(&self) {}
}

pub struct MockRegion {
    bus: u32,
    len: usize,
    inner: Rc<RefCell<Inner>>,
}

impl RegisterAccess for MockRegion {
    fn read32(&self, offset: usize) -> u32 {
        let inner = self.inner.borrow();
        let bytes = &inner.regions[&self.bus][offset..offset + 4];
        u32::from_le_bytes(bytes.try_into().unwrap())
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let mut inner = self.inner.borrow_mut();
        let bytes = inner.regions.get_mut(&self.bus).unwrap();
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn barrier(&self) {}
}

impl CoherentMemory for MockRegion {
    fn bus_address(&self) -> u32 {
        self.bus
    }

    fn len(&self) -> usize {
        self.len
    }

    fn write8(&mut self, offset: usize, value: u8) {
        let mut inner = self.inner.borrow_mut();
        inner.regions.get_mut(&self.bus).unwrap()[offset] = value;
    }
}

pub struct MockDelay {
    inner: Rc<RefCell<Inner>>,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            inner.delayed_ns += u64::from(ns);
            inner.delay_hook.take()
        };
        if let Some(mut hook) = hook {
            hook();
            self.inner.borrow_mut().delay_hook.get_or_insert(hook);
        }
    }
}

impl Platform for MockHardware {
    type Window = MockWindow;
    type Region = MockRegion;
    type Delay = MockDelay;

    fn map(&self, phys: u32, len: usize) -> Result<MockWindow> {
        let mut inner = self.inner.borrow_mut();
        inner.map_calls += 1;
        if inner.fail_map_at == Some(inner.map_calls) {
            return Err(Error::ResourceUnavailable {
                resource: Resource::PwmWindow,
            });
        }
        inner.maps += 1;
        Ok(MockWindow {
            base: phys,
            len,
            inner: Rc::clone(&self.inner),
        })
    }

    fn unmap(&self, _window: MockWindow) {
        self.inner.borrow_mut().unmaps += 1;
    }

    fn alloc_coherent(&self, len: usize) -> Result<MockRegion> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_alloc {
            return Err(Error::ResourceUnavailable {
                resource: Resource::DmaMemory,
            });
        }
        let bus = inner.next_bus;
        inner.next_bus += REGION_BUS_STRIDE;
        // Garbage, so the zero fill is observable.
        inner.regions.insert(bus, vec![0xA5; len]);
        inner.allocs += 1;
        Ok(MockRegion {
            bus,
            len,
            inner: Rc::clone(&self.inner),
        })
    }

    fn free_coherent(&self, region: MockRegion) {
        let mut inner = self.inner.borrow_mut();
        inner.regions.remove(&region.bus);
        inner.frees += 1;
    }

    fn delay(&self) -> MockDelay {
        MockDelay {
            inner: Rc::clone(&self.inner),
        }
    }
}
