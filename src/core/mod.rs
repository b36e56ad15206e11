//! Core module containing the remote control server
//!
//! This module provides:
//! - Controlled device interface and a simulated receiver
//! - Command registry with typed method descriptors
//! - Wire protocol codec and request framing
//! - Per-connection sessions
//! - TCP and serial transports
//! - Transport supervision for the owner
//! - Logging setup

pub mod controller;
pub mod device;
pub mod engine;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
