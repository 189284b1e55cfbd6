//! Parser / proxy layer: turns wire JSON into the normalized form a query
//! instance stores, extracting entities into the entity map along the way,
//! and turns normalized values back into something reactive callers can
//! read.

pub mod normalized;
pub mod parse;
pub mod proxy;

pub use normalized::{collect_entity_refs, Normalized};
pub use parse::{parse_root, ExtractedEntity, ParseContext};
pub use proxy::{clone_deep, entity_id_from_value, EntityProxy, ValueProxy};
