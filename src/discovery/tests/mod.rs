// src/discovery/tests/mod.rs
//! Tests for registration, health checking and lookup

mod service_discovery_tests;
