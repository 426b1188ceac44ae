//! 16550 UART Driver for the PC's first serial port
//!
//! Provides serial console output and the sink for the `log` facade.
//!
//! # Port Map (COM1)
//! - Base port: 0x3F8
//! - Registers at base + 0..=7
//!
//! Output only; the receiver is left disabled.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::arch::{inb, outb};

/// COM1 base port
const COM1: u16 = 0x3F8;

/// Register offsets from the base port
mod regs {
    /// Transmit holding register (divisor low byte with DLAB set)
    pub const DATA: u16 = 0;
    /// Interrupt enable register (divisor high byte with DLAB set)
    pub const INTERRUPT_ENABLE: u16 = 1;
    /// FIFO control register
    pub const FIFO_CONTROL: u16 = 2;
    /// Line control register
    pub const LINE_CONTROL: u16 = 3;
    /// Modem control register
    pub const MODEM_CONTROL: u16 = 4;
    /// Line status register
    pub const LINE_STATUS: u16 = 5;
}

/// Line status: transmit holding register empty
const LSR_THR_EMPTY: u8 = 1 << 5;
/// Line control: divisor latch access
const LCR_DLAB: u8 = 1 << 7;
/// Line control: 8 data bits, no parity, one stop bit
const LCR_8N1: u8 = 0x03;
/// 115200 / 3 = 38400 baud
const BAUD_DIVISOR: u16 = 3;

/// 16550 UART driver
pub struct SerialPort {
    base: u16,
    initialized: bool,
}

impl SerialPort {
    /// Create a new port (not yet initialized)
    pub const fn new(base: u16) -> Self {
        Self {
            base,
            initialized: false,
        }
    }

    /// Program 38400 8N1 with FIFOs on.
    ///
    /// # Safety
    /// `base` must be a 16550-compatible UART nobody else drives.
    pub unsafe fn init(&mut self) {
        let base = self.base;
        // SAFETY: Caller guarantees the port belongs to us.
        unsafe {
            outb(base + regs::INTERRUPT_ENABLE, 0x00);
            outb(base + regs::LINE_CONTROL, LCR_DLAB);
            outb(base + regs::DATA, BAUD_DIVISOR as u8);
            outb(base + regs::INTERRUPT_ENABLE, (BAUD_DIVISOR >> 8) as u8);
            outb(base + regs::LINE_CONTROL, LCR_8N1);
            // Enable and clear FIFOs, 14-byte threshold.
            outb(base + regs::FIFO_CONTROL, 0xC7);
            // DTR, RTS, OUT2.
            outb(base + regs::MODEM_CONTROL, 0x0B);
        }
        self.initialized = true;
    }

    fn write_byte(&self, byte: u8) {
        if !self.initialized {
            return;
        }
        // SAFETY: The port was programmed by `init`.
        unsafe {
            while inb(self.base + regs::LINE_STATUS) & LSR_THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            outb(self.base + regs::DATA, byte);
        }
    }

    /// Write a string, turning `\n` into `\r\n`.
    pub fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        SerialPort::write_str(self, s);
        Ok(())
    }
}

/// Global COM1 instance protected by spinlock
pub static SERIAL: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut port = $crate::drivers::serial::SERIAL.lock();
        let _ = write!(port, $($arg)*);
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}

/// `log` sink writing `[LEVEL] target: message` lines to COM1.
pub struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        kprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Route the `log` macros to COM1. Call once, after [`SerialPort::init`].
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
