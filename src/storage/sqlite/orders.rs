use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

use super::catalog::{fetch_listing, fetch_product};
use super::*;
use crate::domain::*;
use crate::storage::OrderStore;

const ORDER_COLUMNS: &str = "o.id, o.listing_id, o.buyer_id, o.order_date, o.status, o.payment_method, \
     o.subtotal_cents, o.shipping_fee_cents, o.total_cents, o.commission_cents, o.ship_full_name, o.ship_phone, \
     o.ship_email, o.ship_country, o.ship_state, o.ship_city, o.ship_address, o.updated_at";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get("id")?,
        listing_id: row.get("listing_id")?,
        buyer_id: row.get("buyer_id")?,
        order_date: get_ts(row, "order_date")?,
        status: get_enum(row, "status")?,
        payment_method: get_enum(row, "payment_method")?,
        subtotal: get_money(row, "subtotal_cents")?,
        shipping_fee: get_money(row, "shipping_fee_cents")?,
        total: get_money(row, "total_cents")?,
        site_commission: get_money(row, "commission_cents")?,
        shipping: ShippingDetails {
            full_name: row.get("ship_full_name")?,
            phone: row.get("ship_phone")?,
            email: row.get("ship_email")?,
            country: row.get("ship_country")?,
            state: row.get("ship_state")?,
            city: row.get("ship_city")?,
            address: row.get("ship_address")?,
        },
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<OrderItem> {
    Ok(OrderItem {
        id: row.get("id")?,
        order_id: row.get("order_id")?,
        product_id: row.get("product_id")?,
        product_name: row.get("product_name")?,
        price: get_money(row, "price_cents")?,
        quantity: row.get("quantity")?,
        subtotal: get_money(row, "subtotal_cents")?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentTransaction> {
    Ok(PaymentTransaction {
        id: row.get("id")?,
        order_id: row.get("order_id")?,
        amount: get_money(row, "amount_cents")?,
        method: get_enum(row, "method")?,
        status: get_enum(row, "status")?,
        reference: row.get("reference")?,
        notes: row.get("notes")?,
        created_at: get_ts(row, "created_at")?,
        completed_at: get_opt_ts(row, "completed_at")?,
    })
}

fn fetch_order(conn: &Connection, id: Id) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders o WHERE o.id = ?1", ORDER_COLUMNS);
    Ok(conn.query_row(&sql, params![id], order_from_row).optional()?)
}

fn day_start(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl OrderStore for SqliteStorage {
    async fn place_order(&self, draft: &OrderDraft) -> Result<Order> {
        if draft.lines.is_empty() {
            return Err(BazaarError::invalid("an order needs at least one item"));
        }
        self.with_tx(|tx| {
            let mut priced = Vec::with_capacity(draft.lines.len());
            let mut seen_products = HashSet::with_capacity(draft.lines.len());
            for line in &draft.lines {
                if line.quantity < 1 {
                    return Err(BazaarError::invalid("quantity must be at least 1"));
                }
                let listing = fetch_listing(tx, line.listing_id)?.ok_or_else(|| BazaarError::not_found("listing"))?;
                if listing.status != ListingStatus::Available {
                    return Err(BazaarError::conflict(format!("listing {} is no longer available", listing.id)));
                }
                if listing.seller_id == draft.buyer_id {
                    return Err(BazaarError::forbidden("you cannot buy your own listing"));
                }
                let product =
                    fetch_product(tx, listing.product_id)?.ok_or_else(|| BazaarError::not_found("product"))?;
                if !product.is_purchasable() {
                    return Err(BazaarError::conflict(format!("{} is no longer available", product.name)));
                }
                // Each product is sold once, whichever listing it is bought through.
                if !seen_products.insert(product.id) {
                    return Err(BazaarError::conflict(format!("{} appears more than once in the order", product.name)));
                }
                priced.push((line, listing, product));
            }

            let subtotal: Money = priced.iter().map(|(line, listing, _)| listing.price * line.quantity).sum();
            let commission = subtotal.basis_points(draft.commission_bp);
            let total = subtotal + draft.shipping_fee;
            let now = Utc::now();
            let now_text = ts(&now);
            let first_listing = priced.first().map(|(_, listing, _)| listing.id);
            let s = &draft.shipping;

            tx.execute(
                "INSERT INTO orders (listing_id, buyer_id, order_date, status, payment_method, subtotal_cents,
                     shipping_fee_cents, total_cents, commission_cents, ship_full_name, ship_phone, ship_email,
                     ship_country, ship_state, ship_city, ship_address, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?3)",
                params![
                    first_listing,
                    draft.buyer_id,
                    now_text,
                    OrderStatus::Pending.as_str(),
                    draft.payment_method.as_str(),
                    subtotal.cents(),
                    draft.shipping_fee.cents(),
                    total.cents(),
                    commission.cents(),
                    s.full_name,
                    s.phone,
                    s.email,
                    s.country,
                    s.state,
                    s.city,
                    s.address,
                ],
            )?;
            let order_id = tx.last_insert_rowid();

            for (line, listing, product) in &priced {
                // one row per unit
                for _ in 0..line.quantity {
                    tx.execute(
                        "INSERT INTO order_items (order_id, product_id, product_name, price_cents, quantity, subtotal_cents)
                         VALUES (?1, ?2, ?3, ?4, 1, ?4)",
                        params![order_id, product.id, product.name, listing.price.cents()],
                    )?;
                }
                tx.execute(
                    "UPDATE products SET is_sold = 1, updated_at = ?1 WHERE id = ?2",
                    params![now_text, product.id],
                )?;
                tx.execute(
                    "UPDATE listings SET status = ?1 WHERE id = ?2",
                    params![ListingStatus::Sold.as_str(), listing.id],
                )?;
                if let Some(cart_item_id) = line.cart_item_id {
                    tx.execute(
                        "DELETE FROM cart_items WHERE id = ?1 AND user_id = ?2",
                        params![cart_item_id, draft.buyer_id],
                    )?;
                }
            }

            let completed_at = (draft.transaction_status == TransactionStatus::Completed).then(|| now_text.clone());
            tx.execute(
                "INSERT INTO payment_transactions (order_id, amount_cents, method, status, reference, notes, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    order_id,
                    total.cents(),
                    draft.payment_method.as_str(),
                    draft.transaction_status.as_str(),
                    draft.transaction_reference,
                    draft.transaction_notes,
                    now_text,
                    completed_at,
                ],
            )?;

            fetch_order(tx, order_id)?.ok_or_else(|| BazaarError::not_found("order"))
        })
    }

    async fn get_order(&self, id: Id) -> Result<Option<Order>> {
        self.with_conn(|conn| fetch_order(conn, id))
    }

    async fn order_detail(&self, id: Id) -> Result<Option<OrderDetail>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, u.full_name AS buyer_name, u.email AS buyer_email
                 FROM orders o JOIN users u ON u.id = o.buyer_id WHERE o.id = ?1",
                ORDER_COLUMNS
            );
            let head = conn
                .query_row(&sql, params![id], |row| {
                    Ok((order_from_row(row)?, row.get::<_, String>("buyer_name")?, row.get::<_, String>("buyer_email")?))
                })
                .optional()?;
            let Some((order, buyer_name, buyer_email)) = head else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, order_id, product_id, product_name, price_cents, quantity, subtotal_cents
                 FROM order_items WHERE order_id = ?1 ORDER BY id",
            )?;
            let items = stmt.query_map(params![id], item_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT id, order_id, amount_cents, method, status, reference, notes, created_at, completed_at
                 FROM payment_transactions WHERE order_id = ?1 ORDER BY id",
            )?;
            let transactions =
                stmt.query_map(params![id], transaction_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Some(OrderDetail { order, buyer_name, buyer_email, items, transactions }))
        })
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<OrderSummary>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(buyer_id) = filter.buyer_id {
                cond.push("o.buyer_id = ?").bind(buyer_id);
            }
            if let Some(status) = filter.status {
                cond.push("o.status = ?").bind(status.as_str());
            }
            if let Some(from) = filter.from {
                cond.push("o.order_date >= ?").bind(day_start(from));
            }
            if let Some(to) = filter.to {
                cond.push("o.order_date < ?").bind(day_start(to + Duration::days(1)));
            }
            let select = format!(
                "SELECT {}, u.full_name AS buyer_name, u.email AS buyer_email,
                     (SELECT COUNT(*) FROM order_items oi WHERE oi.order_id = o.id) AS item_count",
                ORDER_COLUMNS
            );
            let from_where = format!("FROM orders o JOIN users u ON u.id = o.buyer_id{}", cond.where_sql());
            paged_query(conn, &select, &from_where, "ORDER BY o.order_date DESC, o.id DESC", &cond, filter.page, |row| {
                Ok(OrderSummary {
                    order: order_from_row(row)?,
                    buyer_name: row.get("buyer_name")?,
                    buyer_email: row.get("buyer_email")?,
                    item_count: row.get("item_count")?,
                })
            })
        })
    }

    async fn update_order_status(&self, id: Id, status: OrderStatus) -> Result<Order> {
        self.with_tx(|tx| {
            let now = ts(&Utc::now());
            let changed = tx.execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?;
            expect_row(changed, "order")?;
            if status.marks_items_sold() {
                tx.execute(
                    "UPDATE products SET is_sold = 1, updated_at = ?1
                     WHERE id IN (SELECT product_id FROM order_items WHERE order_id = ?2)",
                    params![now, id],
                )?;
            }
            fetch_order(tx, id)?.ok_or_else(|| BazaarError::not_found("order"))
        })
    }

    async fn delete_order(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM orders WHERE id = ?1", params![id])?;
            expect_row(changed, "order")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::storage::{CartStore, CatalogStore};

    fn draft(buyer: Id, lines: Vec<OrderLine>) -> OrderDraft {
        OrderDraft {
            buyer_id: buyer,
            lines,
            payment_method: PaymentMethod::CashOnDelivery,
            shipping_fee: Money::from_cents(5000),
            shipping: ShippingDetails::default(),
            commission_bp: 500,
            transaction_status: TransactionStatus::Pending,
            transaction_reference: "ref-1".into(),
            transaction_notes: None,
        }
    }

    #[tokio::test]
    async fn place_order_marks_goods_sold_and_clears_cart() {
        let store = storage();
        let seller = user(&store, "seller@uni.edu").await;
        let buyer = user(&store, "buyer@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Chemistry", 1010).await;
        let l = listing(&store, &p).await;
        let item = store.insert_cart_item(buyer.id, l.id, 2).await.unwrap();

        let order = store
            .place_order(&draft(buyer.id, vec![OrderLine { listing_id: l.id, quantity: 2, cart_item_id: Some(item.id) }]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, Money::from_cents(2020));
        assert_eq!(order.site_commission, Money::from_cents(101));
        assert_eq!(order.total, Money::from_cents(7020));
        assert_eq!(order.listing_id, Some(l.id));

        let detail = store.order_detail(order.id).await.unwrap().unwrap();
        assert_eq!(detail.items.len(), 2, "one item row per unit");
        assert!(detail.items.iter().all(|i| i.quantity == 1 && i.subtotal == Money::from_cents(1010)));
        assert_eq!(detail.transactions.len(), 1);
        assert_eq!(detail.transactions[0].amount, order.total);

        assert!(store.get_product(p.id).await.unwrap().unwrap().is_sold);
        assert_eq!(store.get_listing(l.id).await.unwrap().unwrap().status, ListingStatus::Sold);
        assert!(store.cart_lines(buyer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn place_order_is_all_or_nothing() {
        let store = storage();
        let seller = user(&store, "seller2@uni.edu").await;
        let buyer = user(&store, "buyer2@uni.edu").await;
        let cat = category(&store, "Books").await;
        let ok = approved_product(&store, seller.id, cat.id, "Fine", 100).await;
        let ok_listing = listing(&store, &ok).await;
        let gone = approved_product(&store, seller.id, cat.id, "Gone", 100).await;
        let mut gone_listing = listing(&store, &gone).await;
        gone_listing.status = ListingStatus::Sold;
        store.update_listing(&gone_listing).await.unwrap();

        let err = store
            .place_order(&draft(
                buyer.id,
                vec![
                    OrderLine { listing_id: ok_listing.id, quantity: 1, cart_item_id: None },
                    OrderLine { listing_id: gone_listing.id, quantity: 1, cart_item_id: None },
                ],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
        assert!(!store.get_product(ok.id).await.unwrap().unwrap().is_sold);
        assert_eq!(store.list_orders(&OrderFilter::default()).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn one_product_cannot_be_sold_twice_in_an_order() {
        let store = storage();
        let seller = user(&store, "seller4@uni.edu").await;
        let buyer = user(&store, "buyer4@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Bike", 9000).await;
        let first = listing(&store, &p).await;
        let second = listing(&store, &p).await;

        let err = store
            .place_order(&draft(
                buyer.id,
                vec![
                    OrderLine { listing_id: first.id, quantity: 1, cart_item_id: None },
                    OrderLine { listing_id: second.id, quantity: 1, cart_item_id: None },
                ],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
        assert!(!store.get_product(p.id).await.unwrap().unwrap().is_sold);
        assert_eq!(store.get_listing(first.id).await.unwrap().unwrap().status, ListingStatus::Available);
        assert_eq!(store.list_orders(&OrderFilter::default()).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn ordered_products_cannot_be_deleted() {
        let store = storage();
        let seller = user(&store, "seller5@uni.edu").await;
        let buyer = user(&store, "buyer5@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Atlas", 1500).await;
        let l = listing(&store, &p).await;
        store
            .place_order(&draft(buyer.id, vec![OrderLine { listing_id: l.id, quantity: 1, cart_item_id: None }]))
            .await
            .unwrap();

        let err = store.delete_product(p.id).await.unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
        assert!(store.get_product(p.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cannot_order_own_listing() {
        let store = storage();
        let seller = user(&store, "self@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Mine", 100).await;
        let l = listing(&store, &p).await;
        let err = store
            .place_order(&draft(seller.id, vec![OrderLine { listing_id: l.id, quantity: 1, cart_item_id: None }]))
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::Forbidden(_)));
    }

    #[tokio::test]
    async fn list_orders_filters_by_status_and_buyer() {
        let store = storage();
        let seller = user(&store, "seller3@uni.edu").await;
        let buyer = user(&store, "buyer3@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p1 = approved_product(&store, seller.id, cat.id, "One", 100).await;
        let p2 = approved_product(&store, seller.id, cat.id, "Two", 200).await;
        let l1 = listing(&store, &p1).await;
        let l2 = listing(&store, &p2).await;
        let o1 = store
            .place_order(&draft(buyer.id, vec![OrderLine { listing_id: l1.id, quantity: 1, cart_item_id: None }]))
            .await
            .unwrap();
        store
            .place_order(&draft(buyer.id, vec![OrderLine { listing_id: l2.id, quantity: 1, cart_item_id: None }]))
            .await
            .unwrap();
        store.update_order_status(o1.id, OrderStatus::Confirmed).await.unwrap();

        let confirmed = store
            .list_orders(&OrderFilter { status: Some(OrderStatus::Confirmed), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(confirmed.total_count, 1);
        assert_eq!(confirmed.items[0].order.id, o1.id);
        assert_eq!(confirmed.items[0].item_count, 1);

        let today = Utc::now().date_naive();
        let mine = store
            .list_orders(&OrderFilter { buyer_id: Some(buyer.id), from: Some(today), to: Some(today), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(mine.total_count, 2);

        let other = store.list_orders(&OrderFilter { buyer_id: Some(seller.id), ..Default::default() }).await.unwrap();
        assert_eq!(other.total_count, 0);
    }
}
