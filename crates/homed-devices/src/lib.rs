//! Gateway-side device model, the in-memory device repository, the Google
//! Smart Home capability mapper, and the trait handlers behind it
//!.

pub mod capability;
pub mod model;
pub mod repository;
pub mod traits;

pub use repository::{DeviceConnection, DeviceRepository};
