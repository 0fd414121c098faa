//! Test Helper Utilities
//!
//! Shared fakes for testing traffic-engine

#![allow(dead_code)]

pub mod fakes;
pub mod ingest_server;

pub use fakes::{build_engine, RecordingBackend, RecordingSink, TestEngine};
pub use ingest_server::{spawn_ingest_server, IngestServer};
