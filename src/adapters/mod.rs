//! Adapters layer: Concrete implementations of ports.
//!
//! - `estimators`: the regressor catalog behind the `Regressor` port
//! - `fs_store`: model directory storage behind the `ArtifactStore` port
//! - `sanitize`: identifier filtering for logs

pub mod estimators;
pub mod fs_store;
pub mod sanitize;

pub use estimators::{quick_catalog, standard_catalog, Estimator};
pub use fs_store::{FsArtifactStore, StoreError};
