//! Thin syscall contracts over the signal core

pub mod signal;

pub use signal::{How, THREAD_PID_OFFSET};
