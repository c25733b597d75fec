//! Register health monitor
//!
//! Keeps a shadow copy of the configuration registers the driver writes and
//! verifies one of them per measurement cycle. A mismatch is repaired either
//! by rewriting the one register or, when that is not trusted, by a full chip
//! reset. Either way the data is not trusted again until
//! [`REGISTER_WAIT_CYCLES`] good transfers have gone by.

use crate::registers::*;

/// Registers verified by the monitor, in check order
///
/// The clock-source register must stay first: a mismatch found at cursor 0
/// always escalates to a full reset.
pub const CHECKED_REGISTERS: [u8; 8] = [
    REG_PWR_MGMT_1,
    REG_USER_CTRL,
    REG_SMPLRT_DIV,
    REG_CONFIG,
    REG_GYRO_CONFIG,
    REG_ACCEL_CONFIG,
    REG_INT_ENABLE,
    REG_INT_PIN_CFG,
];

/// Good transfers required after a mismatch before data is published again
pub const REGISTER_WAIT_CYCLES: u32 = 20;

/// Cooldown after a full chip reset
pub const FULL_RESET_WAIT_US: u64 = 10_000;

/// Cooldown after a single register rewrite
pub const REGISTER_PATCH_WAIT_US: u64 = 3_000;

/// Shadow values of the checked registers plus the rotating check cursor
#[derive(Debug, Clone, Default)]
pub struct RegisterShadow {
    values: [u8; CHECKED_REGISTERS.len()],
    cursor: usize,
}

impl RegisterShadow {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(reg: u8) -> Option<usize> {
        CHECKED_REGISTERS.iter().position(|&r| r == reg)
    }

    /// Record an intentional write; ignored for unchecked registers
    pub fn record(&mut self, reg: u8, value: u8) {
        if let Some(i) = Self::index_of(reg) {
            self.values[i] = value;
        }
    }

    /// Last value intentionally written to `reg`
    pub fn expected(&self, reg: u8) -> Option<u8> {
        Self::index_of(reg).map(|i| self.values[i])
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// (register, expected value) at the cursor
    pub fn current(&self) -> (u8, u8) {
        (CHECKED_REGISTERS[self.cursor], self.values[self.cursor])
    }

    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % CHECKED_REGISTERS.len();
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// All (register, expected value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        CHECKED_REGISTERS.iter().copied().zip(self.values.iter().copied())
    }
}

/// Action the core must carry out on the bus after a mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Issue a full chip reset; data resumes after `deadline_us`
    FullReset { deadline_us: u64 },
    /// Rewrite `register` with `value`; data resumes after `deadline_us`
    Patch {
        register: u8,
        value: u8,
        deadline_us: u64,
    },
}

/// Tiered recovery state machine
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    shadow: RegisterShadow,
    register_wait: u32,
    reset_wait_us: u64,
    pending_wake: bool,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow(&self) -> &RegisterShadow {
        &self.shadow
    }

    pub fn shadow_mut(&mut self) -> &mut RegisterShadow {
        &mut self.shadow
    }

    /// Remaining good transfers before data is trusted
    pub fn register_wait(&self) -> u32 {
        self.register_wait
    }

    /// End of the current recovery cooldown (0 when none was armed)
    pub fn reset_wait_us(&self) -> u64 {
        self.reset_wait_us
    }

    /// True while a recovery cooldown is running
    pub fn in_cooldown(&self, now_us: u64) -> bool {
        now_us < self.reset_wait_us
    }

    /// Compare the value read at the cursor with its shadow
    ///
    /// On a match the cursor advances and `None` is returned.
    pub fn check(&mut self, read_value: u8, now_us: u64) -> Option<Recovery> {
        let (register, expected) = self.shadow.current();
        if read_value == expected {
            self.shadow.advance();
            return None;
        }

        let recovery = if self.register_wait == 0 || self.shadow.cursor() == 0 {
            // first mismatch outside a recovery, or the clock source
            // register itself: escalate to a full reset
            self.reset_wait_us = now_us + FULL_RESET_WAIT_US;
            self.pending_wake = true;
            self.shadow.rewind();
            Recovery::FullReset {
                deadline_us: self.reset_wait_us,
            }
        } else {
            self.reset_wait_us = now_us + REGISTER_PATCH_WAIT_US;
            self.shadow.advance();
            Recovery::Patch {
                register,
                value: expected,
                deadline_us: self.reset_wait_us,
            }
        };

        self.register_wait = REGISTER_WAIT_CYCLES;
        Some(recovery)
    }

    /// Count one good transfer against the settle counter
    ///
    /// Returns true if the data of this cycle must still be withheld.
    pub fn settle(&mut self) -> bool {
        if self.register_wait == 0 {
            return false;
        }
        self.register_wait -= 1;
        true
    }

    /// True while the clock-source restore after a full reset is outstanding
    pub fn needs_wake(&self) -> bool {
        self.pending_wake
    }

    /// Take the clock-source restore owed after a full reset
    pub fn take_pending_wake(&mut self) -> bool {
        std::mem::take(&mut self.pending_wake)
    }

    /// Forget recovery progress after a deliberate bring-up
    pub fn clear_recovery(&mut self) {
        self.register_wait = 0;
        self.reset_wait_us = 0;
        self.pending_wake = false;
        self.shadow.rewind();
    }
}
