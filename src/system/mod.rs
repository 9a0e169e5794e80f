//! System utilities
//!
//! Hardware probing used when the device is left on `auto`.

pub mod gpu;
