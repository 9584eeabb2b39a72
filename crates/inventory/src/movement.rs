use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, LotId, MovementId, ProductId};

use crate::lot::Lot;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Entry,
    Exit,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Entry => "ENTRY",
            MovementType::Exit => "EXIT",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTRY" => Ok(MovementType::Entry),
            "EXIT" => Ok(MovementType::Exit),
            other => Err(DomainError::validation(format!("unknown movement type: {other}"))),
        }
    }
}

/// One immutable ledger row: a quantity entering or leaving a specific lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub movement_date: NaiveDate,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub reference: String,
    pub product_id: ProductId,
    pub lot_id: LotId,
    pub recorded_at: DateTime<Utc>,
}

impl Movement {
    /// ENTRY row for a freshly received lot, covering its whole initial quantity.
    pub fn entry(lot: &Lot, reference: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: MovementId::new(),
            movement_date: lot.entry_date,
            movement_type: MovementType::Entry,
            quantity: lot.initial_quantity,
            unit_price: lot.unit_price,
            reference: reference.into(),
            product_id: lot.product_id,
            lot_id: lot.id,
            recorded_at,
        }
    }

    /// EXIT row drawing `quantity` from `lot` at the lot's acquisition price.
    pub fn exit(
        lot: &Lot,
        quantity: i64,
        movement_date: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "movement quantity must be positive, got {quantity}"
            )));
        }
        Ok(Self {
            id: MovementId::new(),
            movement_date,
            movement_type: MovementType::Exit,
            quantity,
            unit_price: lot.unit_price,
            reference: String::new(),
            product_id: lot.product_id,
            lot_id: lot.id,
            recorded_at,
        })
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn amount(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &MovementId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_type_parses_case_insensitively() {
        assert_eq!("exit".parse::<MovementType>().unwrap(), MovementType::Exit);
        assert_eq!(" Entry ".parse::<MovementType>().unwrap(), MovementType::Entry);
        assert!("SORTIE".parse::<MovementType>().is_err());
    }

    #[test]
    fn movement_type_displays_upper_case() {
        assert_eq!(MovementType::Exit.to_string(), "EXIT");
        assert_eq!(MovementType::Entry.to_string(), "ENTRY");
    }
}
