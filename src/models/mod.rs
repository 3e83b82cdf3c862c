//! Data model shared across the cache, index, search, sync, and trending
//! components.
//!
//! Index documents are modelled as a tagged sum type rather than an untyped
//! map — untyped JSON is confined to the facet/highlight adapter in
//! `crate::index::facets` and the legacy-event adapter in
//! `crate::events::envelope`.

pub mod crypto;
pub mod event;
pub mod order;
pub mod trending;

pub use crypto::CryptoDocument;
pub use event::EventMessage;
pub use order::OrderDocument;
pub use trending::TrendingRecord;

/// A document as it is upserted into or returned from the index.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexDocument {
    Order(OrderDocument),
    Crypto(CryptoDocument),
}

impl IndexDocument {
    pub fn id(&self) -> &str {
        match self {
            IndexDocument::Order(o) => &o.id,
            IndexDocument::Crypto(c) => &c.symbol,
        }
    }
}
