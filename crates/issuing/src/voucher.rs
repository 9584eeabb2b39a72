use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::numbering::exit_reference;
use stockledger_core::{
    AggregateRoot, Clock, DomainError, DomainResult, ExitVoucherId, Lifecycle, ProductId,
};
use stockledger_inventory::{Allocation, Lot, Product, allocate};

/// Exit voucher status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitVoucherStatus {
    Draft,
    Validated,
    Cancelled,
}

impl ExitVoucherStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitVoucherStatus::Draft => "DRAFT",
            ExitVoucherStatus::Validated => "VALIDATED",
            ExitVoucherStatus::Cancelled => "CANCELLED",
        }
    }
}

impl Lifecycle for ExitVoucherStatus {
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (ExitVoucherStatus::Draft, ExitVoucherStatus::Validated),
        (ExitVoucherStatus::Draft, ExitVoucherStatus::Cancelled),
        (ExitVoucherStatus::Cancelled, ExitVoucherStatus::Cancelled),
    ];
}

impl core::fmt::Display for ExitVoucherStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ExitVoucherStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(ExitVoucherStatus::Draft),
            "VALIDATED" => Ok(ExitVoucherStatus::Validated),
            "CANCELLED" => Ok(ExitVoucherStatus::Cancelled),
            _ => Err(DomainError::invalid_transition(format!("invalid status: {s}"))),
        }
    }
}

/// Requested quantity of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitVoucherLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl ExitVoucherLine {
    pub fn new(product_id: ProductId, quantity: i64) -> DomainResult<Self> {
        if quantity < 1 {
            return Err(DomainError::invalid_quantity(format!(
                "exit voucher line quantity must be at least 1, got {quantity}"
            )));
        }
        Ok(Self {
            product_id,
            quantity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExitVoucher {
    pub voucher_number: String,
    pub workshop: String,
    pub comment: Option<String>,
    pub lines: Vec<ExitVoucherLine>,
}

/// Partial edit of a draft voucher. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitVoucherUpdate {
    pub workshop: Option<String>,
    pub comment: Option<String>,
    pub lines: Option<Vec<ExitVoucherLine>>,
}

/// Stock effects of a validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// One allocation per voucher line, in line order, movements already
    /// tagged with the exit reference.
    pub allocations: Vec<Allocation>,
}

impl Issue {
    /// Stock decrement per line, as negative deltas.
    pub fn stock_deltas(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.allocations
            .iter()
            .map(|allocation| (allocation.product_id, -allocation.requested))
    }
}

/// Aggregate root: ExitVoucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitVoucher {
    id: ExitVoucherId,
    voucher_number: String,
    created_at: DateTime<Utc>,
    validated_at: Option<DateTime<Utc>>,
    status: ExitVoucherStatus,
    workshop: String,
    comment: Option<String>,
    lines: Vec<ExitVoucherLine>,
    version: u64,
}

impl ExitVoucher {
    /// Open a DRAFT voucher at version 1.
    pub fn draft(new: NewExitVoucher, clock: &dyn Clock) -> DomainResult<Self> {
        ensure_workshop(&new.workshop)?;
        ensure_lines(&new.lines)?;
        Ok(Self {
            id: ExitVoucherId::new(),
            voucher_number: new.voucher_number,
            created_at: clock.now(),
            validated_at: None,
            status: ExitVoucherStatus::Draft,
            workshop: new.workshop,
            comment: new.comment,
            lines: new.lines,
            version: 1,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ExitVoucherId,
        voucher_number: String,
        created_at: DateTime<Utc>,
        validated_at: Option<DateTime<Utc>>,
        status: ExitVoucherStatus,
        workshop: String,
        comment: Option<String>,
        lines: Vec<ExitVoucherLine>,
        version: u64,
    ) -> Self {
        Self {
            id,
            voucher_number,
            created_at,
            validated_at,
            status,
            workshop,
            comment,
            lines,
            version,
        }
    }

    pub fn id_typed(&self) -> ExitVoucherId {
        self.id
    }

    pub fn voucher_number(&self) -> &str {
        &self.voucher_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn validated_at(&self) -> Option<DateTime<Utc>> {
        self.validated_at
    }

    pub fn status(&self) -> ExitVoucherStatus {
        self.status
    }

    pub fn workshop(&self) -> &str {
        &self.workshop
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn lines(&self) -> &[ExitVoucherLine] {
        &self.lines
    }

    /// Products referenced by the lines, first occurrence order, no repeats.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids = Vec::new();
        for line in &self.lines {
            if !ids.contains(&line.product_id) {
                ids.push(line.product_id);
            }
        }
        ids
    }

    pub fn update(&mut self, update: ExitVoucherUpdate) -> DomainResult<()> {
        self.ensure_draft("modified")?;
        if let Some(workshop) = &update.workshop {
            ensure_workshop(workshop)?;
        }
        if let Some(lines) = &update.lines {
            ensure_lines(lines)?;
        }

        if let Some(workshop) = update.workshop {
            self.workshop = workshop;
        }
        if let Some(comment) = update.comment {
            self.comment = Some(comment);
        }
        if let Some(lines) = update.lines {
            self.lines = lines;
        }
        self.version += 1;
        Ok(())
    }

    /// Validate a DRAFT voucher against a working snapshot of lots.
    ///
    /// `lots` maps each product to its available lots in FIFO order; lines for
    /// the same product draw from the same vector, so a second line sees what
    /// the first one left. The snapshot is scratch space: on error it may hold
    /// partial draws and must be discarded. The voucher itself is only marked
    /// VALIDATED once every line has been allocated.
    pub fn validate(
        &mut self,
        products: &HashMap<ProductId, Product>,
        lots: &mut HashMap<ProductId, Vec<Lot>>,
        clock: &dyn Clock,
    ) -> DomainResult<Issue> {
        self.status.ensure_transition(ExitVoucherStatus::Validated)?;

        let reference = exit_reference(&self.voucher_number);
        let mut allocations = Vec::with_capacity(self.lines.len());

        for line in &self.lines {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| DomainError::not_found("product", line.product_id))?;
            let working = lots.entry(line.product_id).or_default();
            let mut allocation = allocate(product, working, line.quantity, clock)?;
            allocation.tag(&reference);
            allocations.push(allocation);
        }

        self.status = ExitVoucherStatus::Validated;
        self.validated_at = Some(clock.now());
        self.version += 1;
        Ok(Issue { allocations })
    }

    /// Cancel a voucher. Returns `false` if it was already cancelled.
    pub fn cancel(&mut self) -> DomainResult<bool> {
        if self.status == ExitVoucherStatus::Validated {
            return Err(DomainError::invalid_transition(format!(
                "exit voucher {} is VALIDATED and cannot be cancelled",
                self.voucher_number
            )));
        }
        self.status.ensure_transition(ExitVoucherStatus::Cancelled)?;
        if self.status == ExitVoucherStatus::Cancelled {
            return Ok(false);
        }
        self.status = ExitVoucherStatus::Cancelled;
        self.version += 1;
        Ok(true)
    }

    fn ensure_draft(&self, action: &str) -> DomainResult<()> {
        if self.status != ExitVoucherStatus::Draft {
            return Err(DomainError::invalid_transition(format!(
                "only DRAFT exit vouchers can be {action}; {} is {}",
                self.voucher_number, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for ExitVoucher {
    type Id = ExitVoucherId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_workshop(workshop: &str) -> DomainResult<()> {
    if workshop.trim().is_empty() {
        return Err(DomainError::validation("workshop cannot be empty"));
    }
    Ok(())
}

fn ensure_lines(lines: &[ExitVoucherLine]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation(
            "an exit voucher needs at least one line",
        ));
    }
    Ok(())
}
