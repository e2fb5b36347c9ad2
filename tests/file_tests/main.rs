//! File Manager integration tests

#[path = "../common/mod.rs"]
mod common;

mod cleanup_tests;
mod store_tests;
