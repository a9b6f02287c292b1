//! # Adaptive policy switches.
//!
//! Process-lifetime toggles that shape how the slave advertises and shares
//! itself:
//!
//! - [`SmartMem`] / [`SmartCpu`]: while a job runs, shrink the advertised
//!   `memavail`/`cpuavail` by the running job's request so masters pick less
//!   loaded slaves. Supplying an explicit `memavail` on the command line
//!   disables `smartmem`.
//! - [`SmartShare`]: after a job finishes, delay the IDLE announce by a
//!   decorrelated jitter so that masters waiting on several slaves spread
//!   their next submissions instead of dog-piling the first announcer.

use std::time::Duration;

use crate::policies::JitterPolicy;

/// Memory advertisement switch.
#[derive(Debug, Clone, Copy)]
pub struct SmartMem {
    pub enabled: bool,
}

/// CPU advertisement switch.
#[derive(Debug, Clone, Copy)]
pub struct SmartCpu {
    pub enabled: bool,
}

/// Post-job announce spreading switch.
#[derive(Debug, Clone, Copy)]
pub struct SmartShare {
    pub enabled: bool,
    /// Previous applied delay; feeds the decorrelated jitter.
    pub prev_delay: Duration,
}

/// Base delay for smartshare spreading.
const SHARE_BASE: Duration = Duration::from_millis(25);

/// Cap for smartshare spreading.
const SHARE_MAX: Duration = Duration::from_millis(250);

impl SmartShare {
    /// Computes the next post-job announce delay and records it.
    ///
    /// Returns `Duration::ZERO` when disabled.
    pub fn next_delay(&mut self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let delay =
            JitterPolicy::Decorrelated.apply_decorrelated(SHARE_BASE, self.prev_delay, SHARE_MAX);
        self.prev_delay = delay;
        delay
    }
}

impl Default for SmartMem {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SmartCpu {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SmartShare {
    fn default() -> Self {
        Self {
            enabled: true,
            prev_delay: SHARE_BASE,
        }
    }
}
