//! rollcall-kiosk — one identification session at the kiosk.
//!
//! Wires the model loader, camera session, capture pipeline, identification
//! client and confirmation card behind a single [`Kiosk`] controller.
//!
//! No inference backend ships with this crate: the host embeds [`Kiosk`] and
//! supplies a [`rollcall_core::CapabilityProvider`] to its model loader,
//! building the rest from [`Config::model_source`], [`Config::detector_options`]
//! and [`Config::auto_hide`].

pub mod config;
pub mod controller;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError};
pub use controller::Kiosk;
pub use pipeline::{CaptureError, CapturePipeline};
