//! rollcall-hw — camera capture and frame handling for the attendance
//! pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError};
pub use frame::{Frame, FrameSource};
