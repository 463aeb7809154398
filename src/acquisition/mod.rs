//! # Acquisition Module
//!
//! The acquisition-and-broadcast engine: everything between the sample
//! source and the subscribers.
//!
//! ## Key Components:
//! - **Frame**: one synchronized multi-channel batch of i16 samples, plus
//!   the interleaved-buffer demultiplexer and the wire encoding
//! - **Sources**: the emulated sinusoid generator and the DMA-backed
//!   hardware source behind the register-interface seam
//! - **Controller**: the Idle/Running state machine that owns the
//!   cancellable sampling loop

pub mod controller;
pub mod frame;
pub mod source;
