//! # RAYBRIDGE Rendering
//!
//! The ray-tracing consumer. Replays the producer's records into scene
//! tables, keeps bottom-level acceleration structures cached by content
//! and rebuilds the top-level structure every frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CONSUMER FRAME                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Chunk → apply records → Scene tables ──► upload worker       │
//! │                              ↓                                │
//! │  FrameEnd → evict → BLAS build pass → TLAS → render           │
//! │                              ↓                                │
//! │  acknowledge → present → signal presentation                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## MANDATE
//!
//! - Identical geometry is built once
//! - An instance whose structure is not built is skipped, never waited on
//! - The device is a trait; `HeadlessDevice` runs everywhere

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod accel;
pub mod bridge;
pub mod device;
pub mod error;
pub mod scene;
pub mod upload;

pub use accel::{
    BlasCache, BlasCacheConfig, BlasCacheStats, BlasKey, BlasState, GeometrySource, InstanceMask,
    TopLevelBuilder,
};
pub use bridge::{FrameConstants, RenderBridge, RenderBridgeConfig, RenderBridgeStats};
pub use device::{
    Capabilities, FeatureLevel, FrameInputs, HeadlessDevice, RaytracingDevice, TlasInstance,
    TlasInstanceFlags, MAX_TLAS_INSTANCES,
};
pub use error::{RenderError, RenderResult};
pub use scene::{MeshKey, Scene};
pub use upload::{UploadStats, UploadWorker};
