//! Integration tests for tradelink-ws against a local WebSocket server.
//!
//! These tests cover connection lifecycle, subscription restoration and
//! inbound dispatch over a real socket.

pub mod common;
