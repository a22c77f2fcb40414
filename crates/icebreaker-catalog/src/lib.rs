//! Table metadata for volume estimation
//!
//! This crate provides the metadata provider interface used to size a
//! model's inputs, an in-memory provider backed by a table-size snapshot, and
//! the volume estimator that sums direct upstream sizes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use icebreaker_catalog::{StaticMetadataProvider, VolumeEstimator};
//!
//! let provider = StaticMetadataProvider::new().with_table("raw.public.orders", 3 << 30);
//! let estimator = VolumeEstimator::new(Arc::new(provider));
//! let estimate = estimator.estimate(&model);
//! ```

pub mod provider;
pub mod snapshot;
pub mod volume;

pub use provider::{FetchError, MetadataProvider, TableIdentifier};
pub use snapshot::{StaticMetadataProvider, TableSizeSnapshot};
pub use volume::{VolumeEstimate, VolumeEstimator};
