//! Index gateway: the only module that knows the wire format of the
//! external full-text/faceted index.

pub mod client;
pub mod facets;
pub mod params;

pub use client::{IndexClient, IndexGateway};
pub use params::ParamMap;
