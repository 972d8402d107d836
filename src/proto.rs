//! Generated LeapBrushApi bindings
//!
//! Produced by `build.rs`. The client half backs the gRPC transport; the
//! server half is used by loopback servers in tests and tooling.

#![allow(clippy::all, missing_docs, unused_qualifications)]

include!(concat!(env!("OUT_DIR"), "/leapbrush.LeapBrushApi.rs"));

/// Fully qualified service name
pub const SERVICE_NAME: &str = "leapbrush.LeapBrushApi";
