//! Platform syscall wrappers

mod linux;

pub use linux::*;
