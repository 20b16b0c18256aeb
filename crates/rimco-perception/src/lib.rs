//! `rimco-perception` – turning pose-bearing channels into map tracks.
//!
//! - [`geo`] – ENU → lat/lon projection and quaternion heading.
//! - [`track`] – [`TrackProjector`]: per-track bounded tails, heading, and
//!   per-track rotating logs.

pub mod geo;
pub mod track;

pub use geo::{EARTH_RADIUS_M, enu_to_latlon, yaw_from_quaternion};
pub use track::{ORIENTATION_MESSAGE_TYPE, TrackConfig, TrackProjector, TrackSource};
