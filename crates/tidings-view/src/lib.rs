//! Turns store notifications into ordered list-view updates.

pub mod diff;
pub mod materializer;

pub use diff::{diff_snapshots, UpdateDescription};
pub use materializer::{UpdateHandle, ViewMaterializer, ViewUpdate};
