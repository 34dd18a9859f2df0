//! # Audio Pipeline
//!
//! Per-connection audio handling, from raw client chunks to scored windows.
//!
//! ## Key Components:
//! - **Converter**: any supported PCM layout → 16 kHz, 16-bit, mono
//! - **Window Buffer**: fixed-size detection windows over the converted stream
//! - **Session**: the protocol state machine that ties both to a detector
//!
//! The WebSocket transport driving sessions lives in `src/websocket.rs`.

pub mod buffer;
pub mod converter;
pub mod session;

