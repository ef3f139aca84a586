//! Core module containing the main functionality of Wiremon
//!
//! This module provides:
//! - Device session boundary with serial and network transports
//! - Packet classification and conditional hex dumping
//! - Monitor registry with capability descriptors
//! - Protocol-type switching state machine
//! - Four-pane terminal display surface
//! - Single-letter command grammar and dispatcher
//! - Phase-structured event loop with cooperative cancellation
//! - Pulse-timing side channel and clock correlation

pub mod cancel;
pub mod command;
pub mod dump;
pub mod event_loop;
pub mod monitors;
pub mod pulse;
pub mod registry;
pub mod report;
pub mod session;
pub mod surface;
pub mod switcher;
pub mod timing;
