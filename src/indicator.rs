//! Indicator-light collaborator.
//!
//! Fire-and-forget: the pipeline signals state changes and never reads
//! anything back. Implementations wrap whatever drives the physical light;
//! the crate ships a log-backed one for hosts without a light and a no-op.

use std::thread;
use std::time::Duration;

use log::info;

pub trait Indicator {
    fn on(&mut self);
    fn off(&mut self);

    fn toggle(&mut self);

    /// Blink `times` cycles with `period` on and `period` off.
    fn flash(&mut self, period: Duration, times: u8) {
        for _ in 0..times {
            self.on();
            thread::sleep(period);
            self.off();
            thread::sleep(period);
        }
    }
}

/// Reports state changes on the log instead of a physical light.
#[derive(Default)]
pub struct LogIndicator {
    lit: bool,
}

impl Indicator for LogIndicator {
    fn on(&mut self) {
        self.lit = true;
        info!("indicator on");
    }

    fn off(&mut self) {
        self.lit = false;
        info!("indicator off");
    }

    fn toggle(&mut self) {
        if self.lit {
            self.off()
        } else {
            self.on()
        }
    }
}

/// Discards every signal.
#[derive(Default)]
pub struct NullIndicator;

impl Indicator for NullIndicator {
    fn on(&mut self) {}
    fn off(&mut self) {}
    fn toggle(&mut self) {}
    fn flash(&mut self, _period: Duration, _times: u8) {}
}
