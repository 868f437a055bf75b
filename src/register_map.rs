//! Register offsets and bit fields for the PWM, clock-manager, and DMA blocks.
//!
//! Offsets are byte offsets from the start of each block's register window. Bit names follow
//! the BCM2711 peripherals datasheet.
#![allow(missing_docs, reason = "bit names follow the datasheet")]

/// PWM controller registers.
pub mod pwm {
    /// Control.
    pub const CTL: usize = 0x00;
    /// Status.
    pub const STA: usize = 0x04;
    /// DMA configuration.
    pub const DMAC: usize = 0x08;
    /// Channel 1 range.
    pub const RNG1: usize = 0x10;
    /// Channel 1 data.
    pub const DAT1: usize = 0x14;
    /// FIFO input.
    pub const FIF1: usize = 0x18;
    /// Channel 2 range.
    pub const RNG2: usize = 0x20;
    /// Channel 2 data.
    pub const DAT2: usize = 0x24;
    /// Bytes to map for the whole block.
    pub const BLOCK_LEN: usize = 0x28;

    /// `CTL` bits.
    pub mod ctl {
        pub const MSEN2: u32 = 1 << 15;
        pub const USEF2: u32 = 1 << 13;
        pub const POLA2: u32 = 1 << 12;
        pub const SBIT2: u32 = 1 << 11;
        pub const RPTL2: u32 = 1 << 10;
        pub const MODE2: u32 = 1 << 9;
        pub const PWEN2: u32 = 1 << 8;
        pub const MSEN1: u32 = 1 << 7;
        pub const CLRF1: u32 = 1 << 6;
        pub const USEF1: u32 = 1 << 5;
        pub const POLA1: u32 = 1 << 4;
        pub const SBIT1: u32 = 1 << 3;
        pub const RPTL1: u32 = 1 << 2;
        pub const MODE1: u32 = 1 << 1;
        pub const PWEN1: u32 = 1 << 0;
    }

    /// `STA` bits. Error and gap flags are write-1-to-clear.
    pub mod sta {
        pub const STA2: u32 = 1 << 10;
        pub const STA1: u32 = 1 << 9;
        pub const BERR: u32 = 1 << 8;
        pub const GAP02: u32 = 1 << 5;
        pub const GAP01: u32 = 1 << 4;
        pub const RERR1: u32 = 1 << 3;
        pub const WERR1: u32 = 1 << 2;
        pub const EMPT1: u32 = 1 << 1;
        pub const FULL1: u32 = 1 << 0;
        /// Every sticky error flag.
        pub const ERRORS: u32 = BERR | GAP02 | GAP01 | RERR1 | WERR1;
    }

    /// `DMAC` fields.
    pub mod dmac {
        pub const ENAB: u32 = 1 << 31;

        #[must_use]
        pub const fn panic(threshold: u32) -> u32 {
            (threshold & 0xff) << 8
        }

        #[must_use]
        pub const fn dreq(threshold: u32) -> u32 {
            threshold & 0xff
        }
    }
}

/// Clock-manager registers for one clock (here the PWM clock).
pub mod clock {
    use derive_more::Display;

    /// Control.
    pub const CTL: usize = 0x00;
    /// Divisor.
    pub const DIV: usize = 0x04;
    /// Bytes to map for the block.
    pub const BLOCK_LEN: usize = 0x08;

    /// Must accompany every write to `CTL` or `DIV`, or the write is ignored.
    pub const PASSWD: u32 = 0x5a << 24;

    /// `CTL` bits.
    pub mod ctl {
        pub const FLIP: u32 = 1 << 8;
        pub const BUSY: u32 = 1 << 7;
        pub const KILL: u32 = 1 << 5;
        pub const ENAB: u32 = 1 << 4;
        /// `SRC` field.
        pub const SRC: u32 = 0xf;

        #[must_use]
        pub const fn mash(stages: u32) -> u32 {
            (stages & 0x3) << 9
        }
    }

    /// `DIV` fields.
    pub mod div {
        /// Every `DIV` field: `DIVI` and `DIVF`.
        pub const FIELDS: u32 = 0x00ff_ffff;

        #[must_use]
        pub const fn divi(integer: u32) -> u32 {
            (integer & 0xfff) << 12
        }

        #[must_use]
        pub const fn divf(fraction: u32) -> u32 {
            fraction & 0xfff
        }
    }

    /// Clock sources selectable in `CTL.SRC`.
    #[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[repr(u32)]
    pub enum ClockSource {
        /// Clock off.
        #[display("ground")]
        Ground = 0,
        /// Crystal oscillator.
        #[display("oscillator")]
        Oscillator = 1,
        /// PLLA per-channel output.
        #[display("PLLA")]
        PllA = 4,
        /// PLLC per-channel output.
        #[display("PLLC")]
        PllC = 5,
        /// PLLD per-channel output.
        #[display("PLLD")]
        PllD = 6,
        /// HDMI auxiliary.
        #[display("HDMI aux")]
        HdmiAux = 7,
    }

    impl ClockSource {
        /// Value for the `CTL.SRC` field.
        #[must_use]
        pub const fn bits(self) -> u32 {
            self as u32
        }
    }
}

/// DMA engine registers and control-block fields.
pub mod dma {
    /// Control and status.
    pub const CS: usize = 0x00;
    /// Control block address.
    pub const CONBLK_AD: usize = 0x04;
    /// Transfer information (loaded from the control block).
    pub const TI: usize = 0x08;
    /// Source address (loaded from the control block).
    pub const SOURCE_AD: usize = 0x0c;
    /// Destination address (loaded from the control block).
    pub const DEST_AD: usize = 0x10;
    /// Transfer length (loaded from the control block).
    pub const TXFR_LEN: usize = 0x14;
    /// 2D stride (loaded from the control block).
    pub const STRIDE: usize = 0x18;
    /// Next control block (loaded from the control block).
    pub const NEXTCONBK: usize = 0x1c;
    /// Debug.
    pub const DEBUG: usize = 0x20;
    /// Bytes to map for one engine.
    pub const BLOCK_LEN: usize = 0x24;

    /// Control blocks must start on a 256-bit boundary.
    pub const CONTROL_BLOCK_ALIGN: usize = 32;
    /// Size of one control block.
    pub const CONTROL_BLOCK_LEN: usize = 32;

    /// `CS` bits.
    pub mod cs {
        pub const RESET: u32 = 1 << 31;
        pub const ABORT: u32 = 1 << 30;
        pub const DISDEBUG: u32 = 1 << 29;
        pub const WAIT_FOR_OUTSTANDING_WRITES: u32 = 1 << 28;
        pub const ERROR: u32 = 1 << 8;
        pub const WAITING_FOR_OUTSTANDING_WRITES: u32 = 1 << 6;
        pub const DREQ_STOPS_DMA: u32 = 1 << 5;
        pub const PAUSED: u32 = 1 << 4;
        pub const DREQ: u32 = 1 << 3;
        pub const INT: u32 = 1 << 2;
        pub const END: u32 = 1 << 1;
        pub const ACTIVE: u32 = 1 << 0;

        #[must_use]
        pub const fn panic_priority(level: u32) -> u32 {
            (level & 0xf) << 20
        }

        #[must_use]
        pub const fn priority(level: u32) -> u32 {
            (level & 0xf) << 16
        }
    }

    /// `TI` bits, shared by the register and the control block.
    pub mod ti {
        pub const NO_WIDE_BURSTS: u32 = 1 << 26;
        pub const SRC_IGNORE: u32 = 1 << 11;
        pub const SRC_DREQ: u32 = 1 << 10;
        pub const SRC_WIDTH: u32 = 1 << 9;
        pub const SRC_INC: u32 = 1 << 8;
        pub const DEST_IGNORE: u32 = 1 << 7;
        pub const DEST_DREQ: u32 = 1 << 6;
        pub const DEST_WIDTH: u32 = 1 << 5;
        pub const DEST_INC: u32 = 1 << 4;
        pub const WAIT_RESP: u32 = 1 << 3;
        pub const TDMODE: u32 = 1 << 1;
        pub const INTEN: u32 = 1 << 0;

        #[must_use]
        pub const fn waits(cycles: u32) -> u32 {
            (cycles & 0x1f) << 21
        }

        #[must_use]
        pub const fn permap(dreq: u32) -> u32 {
            (dreq & 0x1f) << 16
        }

        #[must_use]
        pub const fn burst_length(beats: u32) -> u32 {
            (beats & 0xf) << 12
        }
    }

    /// `DEBUG` bits. Error flags are write-1-to-clear.
    pub mod debug {
        pub const READ_ERROR: u32 = 1 << 2;
        pub const FIFO_ERROR: u32 = 1 << 1;
        pub const READ_LAST_NOT_SET_ERROR: u32 = 1 << 0;
        /// Every error flag.
        pub const ERRORS: u32 = READ_ERROR | FIFO_ERROR | READ_LAST_NOT_SET_ERROR;
    }
}
