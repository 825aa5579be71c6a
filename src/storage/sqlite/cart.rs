use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::catalog::listing_from_row;
use super::*;
use crate::domain::*;
use crate::storage::CartStore;

fn cart_item_from_row(row: &Row<'_>) -> rusqlite::Result<CartItem> {
    Ok(CartItem {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        listing_id: row.get("listing_id")?,
        quantity: row.get("quantity")?,
        added_at: get_ts(row, "added_at")?,
    })
}

#[async_trait]
impl CartStore for SqliteStorage {
    async fn get_cart_item(&self, id: Id) -> Result<Option<CartItem>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, listing_id, quantity, added_at FROM cart_items WHERE id = ?1",
                    params![id],
                    cart_item_from_row,
                )
                .optional()?)
        })
    }

    async fn find_cart_item(&self, user_id: Id, listing_id: Id) -> Result<Option<CartItem>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, listing_id, quantity, added_at FROM cart_items WHERE user_id = ?1 AND listing_id = ?2",
                    params![user_id, listing_id],
                    cart_item_from_row,
                )
                .optional()?)
        })
    }

    async fn insert_cart_item(&self, user_id: Id, listing_id: Id, quantity: i64) -> Result<CartItem> {
        self.with_conn(|conn| {
            let added_at = Utc::now();
            conn.execute(
                "INSERT INTO cart_items (user_id, listing_id, quantity, added_at) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, listing_id, quantity, ts(&added_at)],
            )
            .map_err(|e| unique_violation(e, "listing is already in the cart"))?;
            Ok(CartItem { id: conn.last_insert_rowid(), user_id, listing_id, quantity, added_at })
        })
    }

    async fn set_cart_quantity(&self, id: Id, quantity: i64) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE cart_items SET quantity = ?1 WHERE id = ?2", params![quantity, id])?;
            expect_row(changed, "cart item")
        })
    }

    async fn delete_cart_item(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM cart_items WHERE id = ?1", params![id])?;
            expect_row(changed, "cart item")
        })
    }

    async fn cart_lines(&self, user_id: Id) -> Result<Vec<CartLine>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ci.id AS item_id, ci.user_id, ci.listing_id, ci.quantity, ci.added_at,
                        l.id, l.product_id, l.seller_id, l.price_cents, l.condition, l.description,
                        l.discount_cents, l.status, l.posted_at,
                        p.name AS product_name, p.is_approved, p.is_sold,
                        (SELECT i.image_url FROM product_images i WHERE i.product_id = p.id
                         ORDER BY i.is_main DESC, i.id LIMIT 1) AS main_image
                 FROM cart_items ci
                 JOIN listings l ON l.id = ci.listing_id
                 JOIN products p ON p.id = l.product_id
                 WHERE ci.user_id = ?1
                 ORDER BY ci.added_at, ci.id",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(CartLine {
                        item: CartItem {
                            id: row.get("item_id")?,
                            user_id: row.get("user_id")?,
                            listing_id: row.get("listing_id")?,
                            quantity: row.get("quantity")?,
                            added_at: get_ts(row, "added_at")?,
                        },
                        listing: listing_from_row(row)?,
                        product_name: row.get("product_name")?,
                        main_image: row.get("main_image")?,
                        product_is_approved: row.get("is_approved")?,
                        product_is_sold: row.get("is_sold")?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn list_cart_items(&self, user_id: Option<Id>) -> Result<Vec<CartItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, listing_id, quantity, added_at FROM cart_items
                 WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id",
            )?;
            let rows = stmt.query_map(params![user_id], cart_item_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::storage::CatalogStore;

    #[tokio::test]
    async fn cart_lines_join_listing_and_product() {
        let store = storage();
        let seller = user(&store, "s@uni.edu").await;
        let buyer = user(&store, "b@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Novel", 1250).await;
        let l = listing(&store, &p).await;
        store.add_image(p.id, "/images/products/n.jpg", true).await.unwrap();

        store.insert_cart_item(buyer.id, l.id, 2).await.unwrap();
        let lines = store.cart_lines(buyer.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_name, "Novel");
        assert_eq!(lines[0].line_total(), Money::from_cents(2500));
        assert_eq!(lines[0].main_image.as_deref(), Some("/images/products/n.jpg"));
        assert!(lines[0].is_purchasable());
    }

    #[tokio::test]
    async fn duplicate_line_is_conflict() {
        let store = storage();
        let seller = user(&store, "s2@uni.edu").await;
        let buyer = user(&store, "b2@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Atlas", 800).await;
        let l = listing(&store, &p).await;

        store.insert_cart_item(buyer.id, l.id, 1).await.unwrap();
        let err = store.insert_cart_item(buyer.id, l.id, 1).await.unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_listing_removes_cart_lines() {
        let store = storage();
        let seller = user(&store, "s3@uni.edu").await;
        let buyer = user(&store, "b3@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Map", 300).await;
        let l = listing(&store, &p).await;
        let item = store.insert_cart_item(buyer.id, l.id, 1).await.unwrap();

        store.delete_listing(l.id).await.unwrap();
        assert!(store.get_cart_item(item.id).await.unwrap().is_none());
    }
}
