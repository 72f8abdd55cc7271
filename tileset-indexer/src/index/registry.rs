//! Kind → builder constructor lookup.

use super::{EnumIndexBuilder, IndexBuilder, IndexKind};
use crate::error::{IndexerError, Result};

type Constructor = fn() -> Box<dyn IndexBuilder>;

fn new_enum_builder() -> Box<dyn IndexBuilder> {
    Box::new(EnumIndexBuilder::new())
}

const CONSTRUCTORS: &[(IndexKind, Constructor)] = &[(IndexKind::Enum, new_enum_builder)];

/// Creates an empty builder for `kind`.
pub fn builder_for(kind: IndexKind) -> Result<Box<dyn IndexBuilder>> {
    CONSTRUCTORS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, constructor)| constructor())
        .ok_or_else(|| IndexerError::Internal(format!("no builder registered for {} index", kind)))
}
