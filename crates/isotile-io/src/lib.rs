//! isotile-io - Volumetric snapshot I/O
//!
//! This crate provides the on-disk and on-wire representations of
//! volumetric snapshots:
//!
//! - **VolumeSample**: one timestep of a structured 3-D grid
//! - **SPH**: the V-Sphere structured-grid file format
//! - **SeriesManifest**: JSON description of a time series
//! - **DataEnvelope**: base64 transport wrapper used by the HTTP surface
//!
//! # Design
//!
//! All codecs implement the `VolumeCodec` trait for uniform access.

pub mod codec;
pub mod manifest;
pub mod sample;

#[cfg(feature = "sph")]
pub mod envelope;

#[cfg(feature = "sph")]
pub mod sph;

pub use codec::*;
pub use manifest::*;
pub use sample::*;

#[cfg(feature = "sph")]
pub use envelope::*;

#[cfg(feature = "sph")]
pub use sph::SphCodec;
