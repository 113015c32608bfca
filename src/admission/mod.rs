//! Admission control: buckets, abuse detection and temporary bans.

mod ban;
mod bucket;
mod controller;
mod global;
mod registry;
mod window;

pub use ban::{BanEntry, BanRule};
pub use bucket::{Allowance, Bucket, BucketAlgorithm, LeakyBucket, TokenBucket};
pub use controller::{AdmissionController, Decision, EntitySnapshot, Reason};
pub use global::GlobalLimiter;
pub use registry::{EntityRegistry, EntitySlot, EntityState};
pub use window::{SlidingWindow, WindowStats};
