pub mod approval;
pub mod attributes;
pub mod map_document;
pub mod matcher;
pub mod normalize;
pub mod projection;
