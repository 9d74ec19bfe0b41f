//! # Previously, on Split Fetching...
//!
//! 🎬 The records were trapped. Not in a database. Not in a file. In the imagination
//! of a for-loop. Someone had to fetch them. Someone had to pretend that counting
//! from zero was blocking I/O. That someone was this module.
//!
//! `in_mem` provides an in-memory reader and sink for tests, benchmarks and demos.
//! The [`InMemoryReader`] turns integer ranges into records (optionally napping between
//! fetches to impersonate a slow network), and the [`InMemorySink`] hoards payloads so
//! tests can count them afterwards.
//!
//! 🦆
//!
//! ⚠️ This is NOT for production. No network calls. No disk I/O. Just vibes and heap memory.

mod in_mem_reader;
mod in_mem_sink;

pub use in_mem_reader::{InMemoryReader, InMemoryReaderConfig};
pub use in_mem_sink::InMemorySink;
