use std::collections::HashMap;

use tracing::{debug, instrument};

use stockledger_core::numbering::exit_voucher_number;
use stockledger_core::{DomainError, ExitVoucherId, ExpectedVersion};
use stockledger_issuing::{ExitVoucher, ExitVoucherLine, ExitVoucherUpdate, NewExitVoucher};

use crate::store::{ChangeSet, StockStore};

use super::{StockWorkflows, WorkflowError};

impl<S> StockWorkflows<S>
where
    S: StockStore + ?Sized,
{
    /// Open a DRAFT voucher numbered `BS-<today>-<count + 1>`.
    #[instrument(skip(self, lines), fields(line_count = lines.len()), err)]
    pub async fn create_exit_voucher(
        &self,
        workshop: &str,
        comment: Option<&str>,
        lines: Vec<ExitVoucherLine>,
    ) -> Result<ExitVoucher, WorkflowError> {
        self.ensure_products_exist(lines.iter().map(|l| l.product_id))
            .await?;

        self.run("create_exit_voucher", || {
            let lines = lines.clone();
            async move {
                let existing = self.store.count_exit_vouchers().await?;
                let voucher = ExitVoucher::draft(
                    NewExitVoucher {
                        voucher_number: exit_voucher_number(self.clock.today(), existing),
                        workshop: workshop.to_string(),
                        comment: comment.map(str::to_string),
                        lines,
                    },
                    self.clock.as_ref(),
                )?;

                let mut changes = ChangeSet::new();
                changes.save_exit_voucher(voucher.clone(), ExpectedVersion::Exact(0));
                Ok((voucher, changes))
            }
        })
        .await
    }

    #[instrument(skip(self, update), fields(exit_voucher_id = %voucher_id), err)]
    pub async fn update_exit_voucher(
        &self,
        voucher_id: ExitVoucherId,
        update: ExitVoucherUpdate,
    ) -> Result<ExitVoucher, WorkflowError> {
        if let Some(lines) = &update.lines {
            self.ensure_products_exist(lines.iter().map(|l| l.product_id))
                .await?;
        }

        self.run("update_exit_voucher", || {
            let update = update.clone();
            async move {
                let mut voucher = self.load_exit_voucher(voucher_id).await?;
                let expected = ExpectedVersion::loaded(&voucher);
                voucher.update(update)?;

                let mut changes = ChangeSet::new();
                changes.save_exit_voucher(voucher.clone(), expected);
                Ok((voucher, changes))
            }
        })
        .await
    }

    /// Validate a DRAFT voucher: FIFO-allocate every line, record the EXIT
    /// movements tagged `EXIT-<voucher number>`, decrement stock and mark the
    /// voucher VALIDATED, all in one commit.
    ///
    /// Any shortfall fails the whole validation before anything is written.
    #[instrument(skip(self), fields(exit_voucher_id = %voucher_id), err)]
    pub async fn validate_exit_voucher(
        &self,
        voucher_id: ExitVoucherId,
    ) -> Result<ExitVoucher, WorkflowError> {
        self.run("validate_exit_voucher", || async move {
            let mut voucher = self.load_exit_voucher(voucher_id).await?;
            let expected = ExpectedVersion::loaded(&voucher);

            let mut products = HashMap::new();
            let mut lots = HashMap::new();
            for product_id in voucher.product_ids() {
                products.insert(product_id, self.load_product(product_id).await?);
                lots.insert(product_id, self.store.available_lots(product_id).await?);
            }

            let issue = voucher.validate(&products, &mut lots, self.clock.as_ref())?;
            for allocation in &issue.allocations {
                debug!(
                    voucher_number = voucher.voucher_number(),
                    product_id = %allocation.product_id,
                    requested = allocation.requested,
                    lots_touched = allocation.draws.len(),
                    "allocated voucher line"
                );
            }

            let mut changes = ChangeSet::new();
            changes.save_exit_voucher(voucher.clone(), expected);
            changes.apply_issue(issue);
            Ok((voucher, changes))
        })
        .await
    }

    /// Cancel a DRAFT voucher. Cancelling a CANCELLED voucher succeeds and
    /// writes nothing; a VALIDATED voucher cannot be cancelled.
    #[instrument(skip(self), fields(exit_voucher_id = %voucher_id), err)]
    pub async fn cancel_exit_voucher(
        &self,
        voucher_id: ExitVoucherId,
    ) -> Result<ExitVoucher, WorkflowError> {
        self.run("cancel_exit_voucher", || async move {
            let mut voucher = self.load_exit_voucher(voucher_id).await?;
            let expected = ExpectedVersion::loaded(&voucher);

            let mut changes = ChangeSet::new();
            if voucher.cancel()? {
                changes.save_exit_voucher(voucher.clone(), expected);
            }
            Ok((voucher, changes))
        })
        .await
    }

    pub async fn exit_voucher(&self, voucher_id: ExitVoucherId) -> Result<ExitVoucher, WorkflowError> {
        self.load_exit_voucher(voucher_id).await
    }

    pub async fn exit_vouchers(&self) -> Result<Vec<ExitVoucher>, WorkflowError> {
        Ok(self.store.exit_vouchers().await?)
    }

    pub async fn exit_vouchers_by_workshop(
        &self,
        workshop: &str,
    ) -> Result<Vec<ExitVoucher>, WorkflowError> {
        let mut vouchers = self.store.exit_vouchers().await?;
        vouchers.retain(|v| v.workshop() == workshop);
        Ok(vouchers)
    }

    async fn load_exit_voucher(
        &self,
        voucher_id: ExitVoucherId,
    ) -> Result<ExitVoucher, WorkflowError> {
        self.store
            .exit_voucher(voucher_id)
            .await?
            .ok_or_else(|| DomainError::not_found("exit voucher", voucher_id).into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use stockledger_core::{FixedClock, OrderId, ProductId};
    use stockledger_inventory::{Lot, LotReceipt, Movement, Product};
    use stockledger_issuing::ExitVoucherStatus;

    use super::*;
    use crate::store::InMemoryStockStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 2).unwrap()
    }

    /// One product with lots of 30 (Jan 1) and 20 (Jan 5).
    async fn setup() -> (StockWorkflows<InMemoryStockStore>, ProductId) {
        let wf = StockWorkflows::new(Arc::new(InMemoryStockStore::new()))
            .with_clock(Arc::new(FixedClock::on(today())));
        let product = Product::new("GLV-L", "Gloves L", Decimal::new(300, 2));
        wf.store().put_product(product.clone()).await.unwrap();

        let mut changes = ChangeSet::new();
        for (i, (day, quantity, cents)) in [(1, 30, 300), (5, 20, 350)].into_iter().enumerate() {
            let lot = Lot::receive(LotReceipt {
                lot_number: format!("LOT-202401{day:02}-{:04}", i + 1),
                entry_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                quantity,
                unit_price: Decimal::new(cents, 2),
                product_id: product.id,
                order_id: OrderId::new(),
                created_at: chrono::Utc::now(),
            })
            .unwrap();
            changes.adjust_stock(product.id, quantity);
            changes.record(Movement::entry(&lot, "CMD-SEED", lot.created_at));
            changes.open_lot(lot);
        }
        wf.store().commit(changes).await.unwrap();
        (wf, product.id)
    }

    fn lines(product: ProductId, quantities: &[i64]) -> Vec<ExitVoucherLine> {
        quantities
            .iter()
            .map(|q| ExitVoucherLine::new(product, *q).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn validation_issues_fifo_and_tags_movements() {
        let (wf, product) = setup().await;
        let voucher = wf
            .create_exit_voucher("Assembly", Some("line 2 restock"), lines(product, &[35]))
            .await
            .unwrap();
        assert_eq!(voucher.voucher_number(), "BS-20240402-0001");
        assert_eq!(voucher.status(), ExitVoucherStatus::Draft);

        let validated = wf.validate_exit_voucher(voucher.id_typed()).await.unwrap();
        assert_eq!(validated.status(), ExitVoucherStatus::Validated);
        assert!(validated.validated_at().is_some());

        let exits: Vec<(i64, String)> = wf
            .store()
            .movements_for_product(product)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.reference.starts_with("EXIT-"))
            .map(|m| (m.quantity, m.reference))
            .collect();
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|(_, r)| r == "EXIT-BS-20240402-0001"));
        assert_eq!(exits.iter().map(|(q, _)| q).sum::<i64>(), 35);

        let lots = wf.store().available_lots(product).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].remaining_quantity(), 15);
        assert_eq!(wf.store().product(product).await.unwrap().unwrap().current_stock, 15);
    }

    #[tokio::test]
    async fn two_lines_for_one_product_share_the_snapshot() {
        let (wf, product) = setup().await;
        let voucher = wf
            .create_exit_voucher("Paint shop", None, lines(product, &[25, 20]))
            .await
            .unwrap();

        wf.validate_exit_voucher(voucher.id_typed()).await.unwrap();

        let lots = wf.store().available_lots(product).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].remaining_quantity(), 5);
        assert_eq!(wf.store().product(product).await.unwrap().unwrap().current_stock, 5);
    }

    #[tokio::test]
    async fn shortfall_leaves_everything_untouched() {
        let (wf, product) = setup().await;
        let voucher = wf
            .create_exit_voucher("Paint shop", None, lines(product, &[30, 21]))
            .await
            .unwrap();

        match wf.validate_exit_voucher(voucher.id_typed()).await {
            Err(WorkflowError::Domain(DomainError::InsufficientStock {
                requested,
                available,
                ..
            })) => {
                assert_eq!(requested, 21);
                assert_eq!(available, 20);
            }
            other => panic!("Expected insufficient stock, got {other:?}"),
        }

        let stored = wf.exit_voucher(voucher.id_typed()).await.unwrap();
        assert_eq!(stored.status(), ExitVoucherStatus::Draft);
        let lots = wf.store().available_lots(product).await.unwrap();
        assert_eq!(
            lots.iter().map(|l| l.remaining_quantity()).collect::<Vec<_>>(),
            vec![30, 20]
        );
        assert_eq!(wf.store().movements_for_product(product).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_rules() {
        let (wf, product) = setup().await;
        let draft = wf
            .create_exit_voucher("Assembly", None, lines(product, &[5]))
            .await
            .unwrap();

        let cancelled = wf.cancel_exit_voucher(draft.id_typed()).await.unwrap();
        assert_eq!(cancelled.status(), ExitVoucherStatus::Cancelled);
        let again = wf.cancel_exit_voucher(draft.id_typed()).await.unwrap();
        assert_eq!(again, cancelled);
        assert_eq!(wf.store().product(product).await.unwrap().unwrap().current_stock, 50);

        assert!(matches!(
            wf.validate_exit_voucher(draft.id_typed()).await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));

        let issued = wf
            .create_exit_voucher("Assembly", None, lines(product, &[5]))
            .await
            .unwrap();
        assert_eq!(issued.voucher_number(), "BS-20240402-0002");
        wf.validate_exit_voucher(issued.id_typed()).await.unwrap();
        assert!(matches!(
            wf.cancel_exit_voucher(issued.id_typed()).await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));
        assert!(matches!(
            wf.validate_exit_voucher(issued.id_typed()).await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));
    }

    #[tokio::test]
    async fn drafts_can_be_edited_and_looked_up() {
        let (wf, product) = setup().await;
        let voucher = wf
            .create_exit_voucher("Assembly", None, lines(product, &[5]))
            .await
            .unwrap();

        let updated = wf
            .update_exit_voucher(
                voucher.id_typed(),
                ExitVoucherUpdate {
                    workshop: Some("Welding".to_string()),
                    comment: Some("urgent".to_string()),
                    lines: Some(lines(product, &[7, 1])),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.workshop(), "Welding");
        assert_eq!(updated.comment(), Some("urgent"));
        assert_eq!(updated.lines().len(), 2);

        assert_eq!(wf.exit_vouchers_by_workshop("Welding").await.unwrap().len(), 1);
        assert!(wf.exit_vouchers_by_workshop("Assembly").await.unwrap().is_empty());
        assert_eq!(wf.exit_vouchers().await.unwrap().len(), 1);

        assert!(matches!(
            wf.update_exit_voucher(
                voucher.id_typed(),
                ExitVoucherUpdate {
                    lines: Some(lines(ProductId::new(), &[1])),
                    ..ExitVoucherUpdate::default()
                }
            )
            .await,
            Err(WorkflowError::Domain(DomainError::NotFound { .. }))
        ));
        assert!(matches!(
            wf.create_exit_voucher("  ", None, lines(product, &[1])).await,
            Err(WorkflowError::Domain(DomainError::Validation(_)))
        ));
        assert!(matches!(
            wf.exit_voucher(ExitVoucherId::new()).await,
            Err(WorkflowError::Domain(DomainError::NotFound { .. }))
        ));
    }
}
