//! APU Delta Modulation Channel (DMC).
//!
//! The DMC plays 1-bit delta-encoded samples fetched from CPU memory via DMA.
//! This module owns only the channel's audio-rate state (timer, output
//! shifter, sample bookkeeping); the actual multi-cycle DMA bus read and its
//! CPU stall are driven externally by the console's DMA coordinator, which
//! polls [`Dmc::needs_sample`] / [`Dmc::sample_addr`] and delivers bytes via
//! [`Dmc::fill_sample_buffer`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// DMC rate table for NTSC (CPU cycles per timer tick).
const DMC_RATE_NTSC: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

/// DMC rate table for PAL (CPU cycles per timer tick).
const DMC_RATE_PAL: [u16; 16] = [
    398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
];

/// Video system, used to select the DMC rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum System {
    /// NTSC (North America, Japan).
    Ntsc,
    /// PAL (Europe, Australia).
    Pal,
}

/// DMC channel.
///
/// # Registers
///
/// - `$4010`: IRQ enable, loop flag, rate index
/// - `$4011`: direct load (7-bit output level)
/// - `$4012`: sample address = `$C000 + (A * $40)`
/// - `$4013`: sample length = `(L * $10) + 1` bytes
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dmc {
    irq_enabled: bool,
    loop_enabled: bool,
    rate_index: u8,

    sample_address: u8,
    sample_length: u8,
    current_address: u16,
    bytes_remaining: u16,

    sample_buffer: u8,
    sample_buffer_empty: bool,
    bits_remaining: u8,
    output_level: u8,

    timer: u16,
    timer_counter: u16,
    rate_table: [u16; 16],

    irq_flag: bool,
    enabled: bool,
}

impl Dmc {
    /// Create a new DMC channel for the given video system.
    #[must_use]
    pub fn new(system: System) -> Self {
        let rate_table = match system {
            System::Ntsc => DMC_RATE_NTSC,
            System::Pal => DMC_RATE_PAL,
        };

        let initial_timer = rate_table[0];

        Self {
            irq_enabled: false,
            loop_enabled: false,
            rate_index: 0,
            sample_address: 0,
            sample_length: 0,
            current_address: 0xC000,
            bytes_remaining: 0,
            sample_buffer: 0,
            sample_buffer_empty: true,
            bits_remaining: 0,
            output_level: 0,
            timer: initial_timer,
            timer_counter: initial_timer,
            rate_table,
            irq_flag: false,
            enabled: false,
        }
    }

    /// Write to register $4010 (IRQ enable, loop, rate index).
    pub fn write_ctrl(&mut self, value: u8) {
        self.irq_enabled = (value & 0x80) != 0;
        self.loop_enabled = (value & 0x40) != 0;
        self.rate_index = value & 0x0F;
        self.timer = self.rate_table[self.rate_index as usize];

        if !self.irq_enabled {
            self.irq_flag = false;
        }
    }

    /// Write to register $4011 (direct load / output level).
    pub fn write_direct_load(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    /// Write to register $4012 (sample address).
    pub fn write_sample_address(&mut self, value: u8) {
        self.sample_address = value;
    }

    /// Write to register $4013 (sample length).
    pub fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value;
    }

    /// Set the channel enable state (from $4015).
    ///
    /// Enabling while no bytes remain restarts sample playback immediately.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;

        if enabled {
            if self.bytes_remaining == 0 {
                self.restart_sample();
            }
        } else {
            self.bytes_remaining = 0;
        }
    }

    /// Does the channel need a sample byte delivered via DMA right now?
    #[must_use]
    pub fn needs_sample(&self) -> bool {
        self.sample_buffer_empty && self.bytes_remaining > 0
    }

    /// Address the DMA coordinator should read the next sample byte from.
    #[must_use]
    pub fn sample_addr(&self) -> u16 {
        self.current_address
    }

    /// Deliver a DMA-fetched sample byte, advancing address/length state.
    ///
    /// Called by the DMA coordinator once it has stalled the CPU and
    /// performed the bus read signalled by [`Dmc::needs_sample`].
    pub fn fill_sample_buffer(&mut self, byte: u8) {
        self.sample_buffer = byte;
        self.sample_buffer_empty = false;
        self.bits_remaining = 8;

        // Address wraps $FFFF -> $8000, not $0000.
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };

        self.bytes_remaining -= 1;

        if self.bytes_remaining == 0 {
            if self.loop_enabled {
                self.restart_sample();
            } else if self.irq_enabled {
                self.irq_flag = true;
            }
        }
    }

    /// Clock the timer. Should be called every CPU cycle.
    ///
    /// No longer performs the sample DMA itself; it only advances the
    /// output shifter. The DMA coordinator is responsible for noticing
    /// [`Dmc::needs_sample`] and calling [`Dmc::fill_sample_buffer`].
    pub fn clock_timer(&mut self) {
        if self.timer_counter == 0 {
            self.timer_counter = self.timer;

            if self.bits_remaining > 0 {
                self.clock_output_shifter();
            }
        } else {
            self.timer_counter -= 1;
        }
    }

    /// Clock the output shifter, consuming one bit from the sample buffer.
    fn clock_output_shifter(&mut self) {
        if self.sample_buffer_empty {
            if self.output_level >= 2 {
                self.output_level -= 2;
            }
        } else {
            if (self.sample_buffer & 1) == 1 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }

            self.sample_buffer >>= 1;
        }

        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.sample_buffer_empty = true;
        }
    }

    /// Restart sample playback from the configured address/length.
    fn restart_sample(&mut self) {
        self.current_address = 0xC000 | (u16::from(self.sample_address) << 6);
        self.bytes_remaining = (u16::from(self.sample_length) << 4) | 1;
    }

    /// Get the current output value (0-127). Zero when disabled.
    #[must_use]
    pub fn output(&self) -> u8 {
        if self.enabled {
            self.output_level
        } else {
            0
        }
    }

    /// Check if the DMC IRQ flag is set.
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.irq_flag
    }

    /// Clear the DMC IRQ flag (called when $4015 is read).
    pub fn clear_irq(&mut self) {
        self.irq_flag = false;
    }

    /// Check if bytes remain to play (for the $4015 status read).
    #[must_use]
    pub fn active(&self) -> bool {
        self.bytes_remaining > 0
    }

    /// Bytes remaining in the current sample, for diagnostics.
    #[must_use]
    pub fn bytes_remaining(&self) -> u16 {
        self.bytes_remaining
    }
}

impl Default for Dmc {
    fn default() -> Self {
        Self::new(System::Ntsc)
    }
}
