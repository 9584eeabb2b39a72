use chrono::NaiveDate;
use tracing::{debug, instrument};

use stockledger_core::numbering::order_number;
use stockledger_core::{DomainError, ExpectedVersion, OrderId, SupplierId};
use stockledger_purchasing::{NewOrder, Order, OrderLine, OrderStatus, OrderUpdate};

use crate::store::{ChangeSet, StockStore};

use super::{StockWorkflows, WorkflowError};

impl<S> StockWorkflows<S>
where
    S: StockStore + ?Sized,
{
    /// Place a PENDING order numbered `CMD-<today>-<count + 1>`.
    ///
    /// Numbers freed by deleted orders are skipped rather than reused.
    #[instrument(skip(self, lines), fields(supplier_id = %supplier_id, line_count = lines.len()), err)]
    pub async fn create_order(
        &self,
        supplier_id: SupplierId,
        requested_delivery: Option<NaiveDate>,
        lines: Vec<OrderLine>,
    ) -> Result<Order, WorkflowError> {
        self.ensure_supplier_exists(supplier_id).await?;
        self.ensure_products_exist(lines.iter().map(|l| l.product_id))
            .await?;

        self.run("create_order", || {
            let lines = lines.clone();
            async move {
                let today = self.clock.today();
                let mut existing = self.store.count_orders().await?;
                let number = loop {
                    let candidate = order_number(today, existing);
                    if self.store.order_by_number(&candidate).await?.is_none() {
                        break candidate;
                    }
                    existing += 1;
                };

                let order = Order::place(NewOrder {
                    order_number: number,
                    order_date: today,
                    requested_delivery,
                    supplier_id,
                    lines,
                })?;

                let mut changes = ChangeSet::new();
                changes.save_order(order.clone(), ExpectedVersion::Exact(0));
                Ok((order, changes))
            }
        })
        .await
    }

    /// Edit a PENDING or VALIDATED order; lines are replaced wholesale.
    #[instrument(skip(self, update), fields(order_id = %order_id), err)]
    pub async fn update_order(
        &self,
        order_id: OrderId,
        update: OrderUpdate,
    ) -> Result<Order, WorkflowError> {
        if let Some(supplier_id) = update.supplier_id {
            self.ensure_supplier_exists(supplier_id).await?;
        }
        if let Some(lines) = &update.lines {
            self.ensure_products_exist(lines.iter().map(|l| l.product_id))
                .await?;
        }

        self.run("update_order", || {
            let update = update.clone();
            async move {
                let mut order = self.load_order(order_id).await?;
                let expected = ExpectedVersion::loaded(&order);
                order.update(update)?;

                let mut changes = ChangeSet::new();
                changes.save_order(order.clone(), expected);
                Ok((order, changes))
            }
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<(), WorkflowError> {
        self.run("delete_order", || async move {
            let order = self.load_order(order_id).await?;
            order.ensure_deletable()?;

            let mut changes = ChangeSet::new();
            changes.delete_order(order_id, ExpectedVersion::loaded(&order));
            Ok(((), changes))
        })
        .await
    }

    /// Administrative status change by name (case-insensitive).
    ///
    /// VALIDATED -> DELIVERED runs a full reception so the order never ends up
    /// delivered without its lots. Asking for the current status is accepted
    /// and writes nothing.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn change_order_status(
        &self,
        order_id: OrderId,
        status: &str,
    ) -> Result<Order, WorkflowError> {
        self.run("change_order_status", || async move {
            let mut order = self.load_order(order_id).await?;
            let next: OrderStatus = status.parse()?;

            if order.status() == OrderStatus::Validated && next == OrderStatus::Delivered {
                return self.plan_reception(order).await;
            }

            let expected = ExpectedVersion::loaded(&order);
            let mut changes = ChangeSet::new();
            if order.change_status(next)? {
                changes.save_order(order.clone(), expected);
            }
            Ok((order, changes))
        })
        .await
    }

    /// Receive a VALIDATED order: one lot and one ENTRY movement per line, the
    /// stock increments and the DELIVERED status, committed together.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn receive_order(&self, order_id: OrderId) -> Result<Order, WorkflowError> {
        self.run("receive_order", || async move {
            let order = self.load_order(order_id).await?;
            self.plan_reception(order).await
        })
        .await
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, WorkflowError> {
        self.load_order(order_id).await
    }

    pub async fn orders(&self) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.store.orders().await?)
    }

    pub async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, WorkflowError> {
        let mut orders = self.store.orders().await?;
        orders.retain(|o| o.status() == status);
        Ok(orders)
    }

    /// Orders of one supplier; an unknown supplier is `NotFound`.
    pub async fn orders_by_supplier(
        &self,
        supplier_id: SupplierId,
    ) -> Result<Vec<Order>, WorkflowError> {
        self.ensure_supplier_exists(supplier_id).await?;
        let mut orders = self.store.orders().await?;
        orders.retain(|o| o.supplier_id() == supplier_id);
        Ok(orders)
    }

    async fn plan_reception(&self, mut order: Order) -> Result<(Order, ChangeSet), WorkflowError> {
        let expected = ExpectedVersion::loaded(&order);
        let existing_lots = self.store.count_lots().await?;
        let reception = order.receive(existing_lots, self.clock.as_ref())?;
        for lot in &reception.lots {
            debug!(
                order_number = order.order_number(),
                lot_number = %lot.lot_number,
                product_id = %lot.product_id,
                quantity = lot.initial_quantity,
                "opening lot"
            );
        }

        let mut changes = ChangeSet::new();
        changes.save_order(order.clone(), expected);
        changes.apply_reception(reception);
        Ok((order, changes))
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Order, WorkflowError> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id).into())
    }

    async fn ensure_supplier_exists(&self, supplier_id: SupplierId) -> Result<(), WorkflowError> {
        match self.store.supplier(supplier_id).await? {
            Some(_) => Ok(()),
            None => Err(DomainError::not_found("supplier", supplier_id).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use stockledger_core::{AggregateRoot, FixedClock, ProductId};
    use stockledger_inventory::{MovementType, Product};
    use stockledger_purchasing::Supplier;

    use super::*;
    use crate::store::{InMemoryStockStore, MovementFilter, Pagination};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    async fn setup() -> (StockWorkflows<InMemoryStockStore>, SupplierId, ProductId) {
        let wf = StockWorkflows::new(Arc::new(InMemoryStockStore::new()))
            .with_clock(Arc::new(FixedClock::on(day())));
        let supplier = Supplier::new("Acme Fasteners");
        let product = Product::new("SCR-4", "Screw 4mm", Decimal::new(2550, 2));
        wf.store().put_supplier(supplier.clone()).await.unwrap();
        wf.store().put_product(product.clone()).await.unwrap();
        (wf, supplier.id, product.id)
    }

    fn line(product: ProductId, quantity: i64, cents: i64) -> OrderLine {
        OrderLine::new(product, quantity, Decimal::new(cents, 2)).unwrap()
    }

    #[tokio::test]
    async fn create_order_numbers_and_totals() {
        let (wf, supplier, product) = setup().await;

        let first = wf
            .create_order(supplier, None, vec![line(product, 10, 250)])
            .await
            .unwrap();
        let second = wf
            .create_order(supplier, Some(day()), vec![line(product, 4, 1000)])
            .await
            .unwrap();

        assert_eq!(first.order_number(), "CMD-20240315-0001");
        assert_eq!(second.order_number(), "CMD-20240315-0002");
        assert_eq!(first.status(), OrderStatus::Pending);
        assert_eq!(first.total_amount(), Decimal::new(2500, 2));
        assert_eq!(second.requested_delivery(), Some(day()));
    }

    #[tokio::test]
    async fn create_order_skips_numbers_of_deleted_orders() {
        let (wf, supplier, product) = setup().await;
        let first = wf
            .create_order(supplier, None, vec![line(product, 1, 100)])
            .await
            .unwrap();
        wf.create_order(supplier, None, vec![line(product, 1, 100)])
            .await
            .unwrap();
        wf.delete_order(first.id_typed()).await.unwrap();

        let third = wf
            .create_order(supplier, None, vec![line(product, 1, 100)])
            .await
            .unwrap();
        assert_eq!(third.order_number(), "CMD-20240315-0003");
        assert_eq!(wf.orders().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_order_requires_known_supplier_and_products() {
        let (wf, supplier, product) = setup().await;

        match wf
            .create_order(SupplierId::new(), None, vec![line(product, 1, 100)])
            .await
        {
            Err(WorkflowError::Domain(DomainError::NotFound { entity, .. })) => {
                assert_eq!(entity, "supplier")
            }
            other => panic!("Expected unknown supplier, got {other:?}"),
        }

        match wf
            .create_order(supplier, None, vec![line(ProductId::new(), 1, 100)])
            .await
        {
            Err(WorkflowError::Domain(DomainError::NotFound { entity, .. })) => {
                assert_eq!(entity, "product")
            }
            other => panic!("Expected unknown product, got {other:?}"),
        }

        assert!(matches!(
            wf.create_order(supplier, None, vec![]).await,
            Err(WorkflowError::Domain(DomainError::Validation(_)))
        ));
        assert_eq!(wf.store().count_orders().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_changes_follow_the_table() {
        let (wf, supplier, product) = setup().await;
        let order = wf
            .create_order(supplier, None, vec![line(product, 5, 100)])
            .await
            .unwrap();
        let id = order.id_typed();

        match wf.change_order_status(id, "delivered").await {
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(msg))) => {
                assert!(msg.contains("PENDING"))
            }
            other => panic!("Expected refused transition, got {other:?}"),
        }
        match wf.change_order_status(id, "shipped").await {
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(msg))) => {
                assert!(msg.contains("shipped"))
            }
            other => panic!("Expected invalid status, got {other:?}"),
        }

        let validated = wf.change_order_status(id, "Validated").await.unwrap();
        assert_eq!(validated.status(), OrderStatus::Validated);
        let back = wf.change_order_status(id, "PENDING").await.unwrap();
        assert_eq!(back.status(), OrderStatus::Pending);

        let unchanged = wf.change_order_status(id, "pending").await.unwrap();
        assert_eq!(unchanged.version(), back.version());
    }

    #[tokio::test]
    async fn delivering_through_status_change_receives_the_order() {
        let (wf, supplier, product) = setup().await;
        let order = wf
            .create_order(supplier, None, vec![line(product, 12, 300)])
            .await
            .unwrap();
        wf.change_order_status(order.id_typed(), "VALIDATED")
            .await
            .unwrap();

        let delivered = wf
            .change_order_status(order.id_typed(), "DELIVERED")
            .await
            .unwrap();
        assert_eq!(delivered.status(), OrderStatus::Delivered);

        let lots = wf.store().available_lots(product).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].initial_quantity, 12);
        assert_eq!(
            wf.store().product(product).await.unwrap().unwrap().current_stock,
            12
        );

        match wf.change_order_status(order.id_typed(), "VALIDATED").await {
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(msg))) => {
                assert!(msg.contains("terminal"))
            }
            other => panic!("Expected terminal status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn receive_requires_validated_order() {
        let (wf, supplier, product) = setup().await;
        let order = wf
            .create_order(supplier, None, vec![line(product, 3, 100)])
            .await
            .unwrap();

        assert!(matches!(
            wf.receive_order(order.id_typed()).await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));
        assert_eq!(wf.store().count_lots().await.unwrap(), 0);

        assert!(matches!(
            wf.receive_order(OrderId::new()).await,
            Err(WorkflowError::Domain(DomainError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn delivered_orders_cannot_be_edited_or_deleted() {
        let (wf, supplier, product) = setup().await;
        let order = wf
            .create_order(supplier, None, vec![line(product, 3, 100)])
            .await
            .unwrap();
        let id = order.id_typed();
        wf.change_order_status(id, "VALIDATED").await.unwrap();
        wf.receive_order(id).await.unwrap();

        assert!(matches!(
            wf.update_order(
                id,
                OrderUpdate {
                    lines: Some(vec![line(product, 1, 100)]),
                    ..OrderUpdate::default()
                }
            )
            .await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));
        assert!(matches!(
            wf.delete_order(id).await,
            Err(WorkflowError::Domain(DomainError::InvalidStateTransition(_)))
        ));
        assert!(wf.order(id).await.is_ok());

        let entries = wf
            .store()
            .query_movements(
                &MovementFilter::new().movement_type(MovementType::Entry),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(entries.items[0].reference, order.order_number());
    }

    #[tokio::test]
    async fn update_replaces_lines_and_supplier() {
        let (wf, supplier, product) = setup().await;
        let other = Supplier::new("Bolt & Co");
        wf.store().put_supplier(other.clone()).await.unwrap();
        let order = wf
            .create_order(supplier, None, vec![line(product, 3, 100)])
            .await
            .unwrap();

        let updated = wf
            .update_order(
                order.id_typed(),
                OrderUpdate {
                    supplier_id: Some(other.id),
                    requested_delivery: None,
                    lines: Some(vec![line(product, 2, 500), line(product, 1, 50)]),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.supplier_id(), other.id);
        assert_eq!(updated.total_amount(), Decimal::new(1050, 2));
        assert_eq!(updated.lines().len(), 2);

        assert_eq!(wf.orders_by_supplier(other.id).await.unwrap().len(), 1);
        assert!(wf.orders_by_supplier(supplier).await.unwrap().is_empty());
        assert!(matches!(
            wf.orders_by_supplier(SupplierId::new()).await,
            Err(WorkflowError::Domain(DomainError::NotFound { .. }))
        ));
        assert_eq!(
            wf.orders_by_status(OrderStatus::Pending).await.unwrap().len(),
            1
        );
    }
}
