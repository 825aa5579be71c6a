use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub to: Option<NaiveDate>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page: Option<i64>,
}

impl Marketplace {
    /// A student sees their own orders; an admin sees everyone's.
    pub async fn orders_for(&self, user: &User, query: OrderQuery) -> Result<Page<OrderSummary>> {
        let filter = OrderFilter {
            buyer_id: (!user.is_admin()).then_some(user.id),
            status: query.status,
            from: query.from,
            to: query.to,
            page: Some(PageRequest::new(query.page, None, self.settings.admin_page_size)),
        };
        self.storage.list_orders(&filter).await
    }

    pub async fn order_details(&self, user: &User, id: Id) -> Result<OrderDetail> {
        let detail = self.storage.order_detail(id).await?.ok_or_else(|| BazaarError::not_found("order"))?;
        if detail.order.buyer_id != user.id && !user.is_admin() {
            return Err(BazaarError::forbidden("this order belongs to someone else"));
        }
        Ok(detail)
    }

    /// Moves an order along its lifecycle and tells the buyer.
    pub async fn change_order_status(&self, admin: &User, id: Id, next: OrderStatus) -> Result<Order> {
        let order = self.storage.get_order(id).await?.ok_or_else(|| BazaarError::not_found("order"))?;
        if !order.status.can_transition_to(next) {
            return Err(BazaarError::InvalidTransition { from: order.status, to: next });
        }
        let updated = self.storage.update_order_status(id, next).await?;
        info!(order_id = id, from = %order.status, to = %next, "Order status changed");

        let kind = match next {
            OrderStatus::Cancelled => NotificationKind::Warning,
            OrderStatus::Delivered | OrderStatus::Completed => NotificationKind::Success,
            _ => NotificationKind::Info,
        };
        let link = format!("/orders/{}", id);
        if let Err(e) = self
            .notify(updated.buyer_id, &format!("Order #{} {}", id, next), next.buyer_message(), kind, Some(&link))
            .await
        {
            tracing::warn!(error = %e, order_id = id, "Failed to notify buyer");
        }
        self.log_activity(
            NewActivity::new("ChangeOrderStatus", Some(admin.id))
                .entity("Order", id)
                .details(format!("{} -> {}", order.status, next)),
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_order(&self, admin: &User, id: Id) -> Result<()> {
        self.storage.delete_order(id).await?;
        info!(order_id = id, "Order deleted");
        self.log_activity(NewActivity::new("DeleteOrder", Some(admin.id)).entity("Order", id)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    async fn placed(m: &Marketplace) -> (User, User, Order) {
        let seller = student(m, "seller@uni.edu").await;
        let buyer = student(m, "buyer@uni.edu").await;
        let books = category(m, "Books").await;
        let (_, listing) = for_sale(m, &seller, books.id, "Backpack", 2500).await;
        let order = m.buy_now(&buyer, listing.id).await.unwrap();
        (seller, buyer, order)
    }

    #[tokio::test]
    async fn status_follows_the_lifecycle() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let (_, buyer, order) = placed(&m).await;

        let err = m.change_order_status(&root, order.id, OrderStatus::Delivered).await.unwrap_err();
        assert!(matches!(err, BazaarError::InvalidTransition { from: OrderStatus::Pending, to: OrderStatus::Delivered }));
        assert!(m.change_order_status(&root, order.id, OrderStatus::Pending).await.is_err(), "same status");

        for next in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered, OrderStatus::Completed] {
            let updated = m.change_order_status(&root, order.id, next).await.unwrap();
            assert_eq!(updated.status, next);
        }
        assert!(m.change_order_status(&root, order.id, OrderStatus::Cancelled).await.is_err(), "terminal");

        let notes = m.recent_notifications(buyer.id).await.unwrap();
        assert_eq!(notes.len(), 4);
        assert_eq!(notes[0].message, OrderStatus::Completed.buyer_message());
    }

    #[tokio::test]
    async fn only_the_buyer_or_admin_sees_an_order() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let (seller, buyer, order) = placed(&m).await;

        assert!(m.order_details(&buyer, order.id).await.is_ok());
        assert!(m.order_details(&root, order.id).await.is_ok());
        assert!(matches!(m.order_details(&seller, order.id).await.unwrap_err(), BazaarError::Forbidden(_)));

        assert_eq!(m.orders_for(&buyer, OrderQuery::default()).await.unwrap().total_count, 1);
        assert_eq!(m.orders_for(&seller, OrderQuery::default()).await.unwrap().total_count, 0);
        assert_eq!(m.orders_for(&root, OrderQuery::default()).await.unwrap().total_count, 1);
    }

    #[tokio::test]
    async fn admin_filters_by_status_and_deletes() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let (_, _, order) = placed(&m).await;
        let cancelled = OrderQuery { status: Some(OrderStatus::Cancelled), ..Default::default() };
        assert_eq!(m.orders_for(&root, cancelled.clone()).await.unwrap().total_count, 0);
        m.change_order_status(&root, order.id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(m.orders_for(&root, cancelled).await.unwrap().total_count, 1);

        m.delete_order(&root, order.id).await.unwrap();
        assert!(matches!(m.order_details(&root, order.id).await.unwrap_err(), BazaarError::NotFound(_)));
    }
}
