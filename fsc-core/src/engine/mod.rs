//! Control engine modules
//!
//! Contains the profile control laws and the zone controller.

mod linear;
mod pid;
mod profile;
mod zone;

pub use linear::LinearProfile;
pub use pid::PidProfile;
pub use profile::{Controller, LinearSpec, PidSpec, ProfileFactory, ProfileSpec, Profiles};
pub use zone::{
    FailSensorPolicy, FallbackEdge, FanMode, SsdProgressiveAlgorithm, Zone, ZoneOutcome,
    ZoneSettings,
};
