//! Container image building.
//!
//! [`availability`] decides whether the build tool can be used at all;
//! [`builder`] runs it against a staged context and classifies the result.

pub mod availability;
pub mod builder;
pub mod capture;
pub mod config;
pub mod reference;

pub use availability::{BuildToolProbe, SystemProbe, ToolStatus};
pub use builder::{BuiltImage, ImageBuilder};
pub use capture::{DiagnosticBuffer, LineSplitter};
pub use reference::ImageReference;
