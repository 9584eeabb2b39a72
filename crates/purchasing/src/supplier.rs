use serde::{Deserialize, Serialize};

use stockledger_core::SupplierId;

/// Supplier master record. Orders only need to know that it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
}

impl Supplier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SupplierId::new(),
            name: name.into(),
        }
    }
}
