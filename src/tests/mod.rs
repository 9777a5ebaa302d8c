// src/tests/mod.rs
mod mesh_tests;
