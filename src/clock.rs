//! Clock-manager programming for the PWM tick.
//!
//! The PWM clock is shared by both channels. [`configure_shared`] claims it through
//! [`CLOCK_LOCK`] so only one caller programs it at a time, and a clock already running with the
//! requested settings is left alone so the other channel keeps streaming. Every wait is bounded
//! by [`ClockConfig::max_polls`].

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::delay::DelayNs;

use crate::config::{ClockConfig, tick_ns};
use crate::error::WaitOperation;
use crate::hw::RegisterAccess;
use crate::register_map::clock::{CTL, DIV, PASSWD, ctl, div};
use crate::{Error, Result};

/// Smallest integer divider the clock manager accepts.
pub const DIVIDER_MIN: u32 = 2;
/// Largest integer divider the 12-bit `DIVI` field holds.
pub const DIVIDER_MAX: u32 = 0xfff;

/// Set while a caller is programming the PWM clock.
///
/// The mutex is held only to test and set the flag. The clock polls run with it released, so
/// interrupts are never masked for a whole clock restart.
pub static CLOCK_LOCK: Mutex<CriticalSectionRawMutex, Cell<bool>> = Mutex::new(Cell::new(false));

/// Integer divider for `config`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if the target is zero or the divider falls outside
/// [`DIVIDER_MIN`]..=[`DIVIDER_MAX`].
pub const fn divider(config: &ClockConfig) -> Result<u32> {
    if config.target_hz == 0 {
        return Err(Error::invalid("clock target frequency is zero"));
    }
    let divider = config.reference_hz / config.target_hz;
    if divider < DIVIDER_MIN || divider > DIVIDER_MAX {
        return Err(Error::invalid("clock divider out of range"));
    }
    Ok(divider)
}

/// Run the PWM clock from `config.source` at the divider `config` asks for.
///
/// A clock that is already running from the same source and divider is not touched, so a
/// serializer fed by it keeps its tick. Otherwise the clock is stopped, the divider loaded, and
/// the clock restarted. Returns the divider in effect.
///
/// # Errors
///
/// [`Error::InvalidArgument`] for an unusable divider, before any register is touched.
/// [`Error::HardwareTimeout`] if the clock does not stop or start within the polling bound.
pub fn configure<W, D>(window: &mut W, delay: &mut D, config: &ClockConfig) -> Result<u32>
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    let divider = divider(config)?;
    let source = config.source.bits();

    if is_running_with(window, source, divider) {
        debug!("PWM clock already running at divider {}", divider);
        return Ok(divider);
    }

    // Changing DIV while BUSY glitches the output.
    window.write32(CTL, PASSWD | source);
    window.barrier();
    wait_for(window, delay, config, false, WaitOperation::ClockStop)?;

    window.write32(DIV, PASSWD | div::divi(divider));
    window.barrier();
    window.write32(CTL, PASSWD | source | ctl::ENAB);
    window.barrier();
    wait_for(window, delay, config, true, WaitOperation::ClockStart)?;

    info!(
        "PWM clock: {} Hz / {} from {} = {} ns per tick",
        config.reference_hz,
        divider,
        config.source,
        tick_ns(config.reference_hz, divider)
    );
    Ok(divider)
}

/// [`configure`] with the clock claimed through [`CLOCK_LOCK`].
///
/// Waits for a concurrent caller to finish first. Must not be called from an interrupt that can
/// preempt another caller.
///
/// # Errors
///
/// As [`configure`].
pub fn configure_shared<W, D>(window: &mut W, delay: &mut D, config: &ClockConfig) -> Result<u32>
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    while CLOCK_LOCK.lock(|claimed| claimed.replace(true)) {
        core::hint::spin_loop();
    }
    let configured = configure(window, delay, config);
    CLOCK_LOCK.lock(|claimed| claimed.set(false));
    configured
}

fn is_running_with<W>(window: &W, source: u32, divider: u32) -> bool
where
    W: RegisterAccess + ?Sized,
{
    let control = window.read32(CTL);
    let running = ctl::ENAB | ctl::BUSY;
    control & running == running
        && control & (ctl::SRC | ctl::mash(3)) == source
        && window.read32(DIV) & div::FIELDS == div::divi(divider)
}

fn wait_for<W, D>(
    window: &W,
    delay: &mut D,
    config: &ClockConfig,
    busy: bool,
    operation: WaitOperation,
) -> Result<()>
where
    W: RegisterAccess + ?Sized,
    D: DelayNs,
{
    for _ in 0..config.max_polls {
        if (window.read32(CTL) & ctl::BUSY != 0) == busy {
            return Ok(());
        }
        delay.delay_us(config.poll_interval_us);
    }
    if (window.read32(CTL) & ctl::BUSY != 0) == busy {
        return Ok(());
    }
    error!(
        "timed out waiting for {} after {} polls",
        operation, config.max_polls
    );
    Err(Error::timeout(operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OSCILLATOR_HZ;
    use crate::register_map::clock::ClockSource;

    /// Clock block whose BUSY flag follows ENAB, like the real generator once settled.
    #[derive(Default)]
    struct FakeClock {
        ctl: u32,
        div: u32,
        unresponsive: bool,
        writes: Vec<(usize, u32)>,
    }

    impl RegisterAccess for FakeClock {
        fn read32(&self, offset: usize) -> u32 {
            match offset {
                CTL if self.unresponsive || self.ctl & ctl::ENAB != 0 => self.ctl | ctl::BUSY,
                CTL => self.ctl,
                DIV => self.div,
                _ => 0,
            }
        }

        fn write32(&mut self, offset: usize, value: u32) {
            assert_eq!(value & 0xff00_0000, PASSWD);
            self.writes.push((offset, value));
            match offset {
                CTL => self.ctl = value & 0x00ff_ffff,
                DIV => self.div = value & 0x00ff_ffff,
                _ => {}
            }
        }

        fn barrier(&self) {}
    }

    #[derive(Default)]
    struct CountingDelay {
        us: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.us += u64::from(ns) / 1_000;
        }
    }

    #[test]
    fn reference_design_divides_by_twenty_two() {
        assert_eq!(divider(&ClockConfig::DEFAULT), Ok(22));
    }

    #[test]
    fn configure_loads_divider_and_enables_oscillator() {
        let mut clock = FakeClock::default();
        let mut delay = CountingDelay::default();

        assert_eq!(
            configure(&mut clock, &mut delay, &ClockConfig::DEFAULT),
            Ok(22)
        );
        assert_eq!(clock.div, 22 << 12);
        assert_eq!(clock.ctl, ClockSource::Oscillator.bits() | ctl::ENAB);
        assert_eq!(clock.writes.len(), 3);
    }

    #[test]
    fn running_clock_with_matching_settings_is_left_alone() {
        let mut clock = FakeClock {
            ctl: ClockSource::Oscillator.bits() | ctl::ENAB,
            div: 22 << 12,
            ..FakeClock::default()
        };
        let mut delay = CountingDelay::default();

        assert_eq!(
            configure_shared(&mut clock, &mut delay, &ClockConfig::DEFAULT),
            Ok(22)
        );
        assert!(clock.writes.is_empty());
        assert_eq!(delay.us, 0);
        assert!(!CLOCK_LOCK.lock(Cell::get));
    }

    #[test]
    fn running_clock_with_other_divider_is_stopped_first() {
        let mut clock = FakeClock {
            ctl: ClockSource::Oscillator.bits() | ctl::ENAB,
            div: 20 << 12,
            ..FakeClock::default()
        };
        let mut delay = CountingDelay::default();

        assert_eq!(
            configure(&mut clock, &mut delay, &ClockConfig::DEFAULT),
            Ok(22)
        );
        assert_eq!(
            clock.writes,
            [
                (CTL, PASSWD | ClockSource::Oscillator.bits()),
                (DIV, PASSWD | (22 << 12)),
                (CTL, PASSWD | ClockSource::Oscillator.bits() | ctl::ENAB),
            ]
        );
    }

    #[test]
    fn stuck_busy_flag_times_out_within_bound() {
        let mut clock = FakeClock {
            unresponsive: true,
            ..FakeClock::default()
        };
        let mut delay = CountingDelay::default();
        let config = ClockConfig {
            max_polls: 5,
            poll_interval_us: 10,
            ..ClockConfig::DEFAULT
        };

        assert_eq!(
            configure(&mut clock, &mut delay, &config),
            Err(Error::HardwareTimeout {
                operation: WaitOperation::ClockStop
            })
        );
        assert_eq!(delay.us, 50);
        assert_eq!(clock.div, 0);
    }

    #[test]
    fn out_of_range_divider_is_rejected_before_any_write() {
        let config = ClockConfig {
            target_hz: OSCILLATOR_HZ,
            ..ClockConfig::DEFAULT
        };
        assert!(matches!(
            divider(&config),
            Err(Error::InvalidArgument { .. })
        ));
        let zero = ClockConfig {
            target_hz: 0,
            ..ClockConfig::DEFAULT
        };
        assert!(divider(&zero).is_err());
    }
}
