//! Device drivers
//!
//! Only what the memory core needs to report progress: a polled serial port.

pub mod serial;
