//! Integration tests for tradelink-api against a local HTTP backend.

pub mod common;
