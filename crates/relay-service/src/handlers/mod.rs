//! HTTP handlers for the meeting API.

mod meetings;
mod status;

pub use meetings::{get_meeting, get_transport_config};
pub use status::get_status;
