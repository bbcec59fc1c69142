//! Atmosphere-model grid: file index, model reader, interpolation and serialization.

pub mod catalog;
pub mod interp;
pub mod model;
pub mod serialize;

pub use catalog::{BracketSet, GridCatalog, GridEntry};
pub use interp::{GridInterpolator, InterpolatedModel};
pub use model::AtmosphereGridPoint;
pub use serialize::write_kurucz;
