use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::domain::*;
use crate::storage::CatalogStore;

const PRODUCT_COLUMNS: &str = "p.id, p.name, p.category_id, p.price_cents, p.owner_id, p.is_approved, p.approved_at, \
     p.is_sold, p.is_featured, p.is_for_rent, p.price_per_day_cents, p.created_at, p.updated_at";

const CARD_SELECT: &str = "c.name AS category_name, u.full_name AS owner_name, col.name AS owner_college,
     (SELECT i.image_url FROM product_images i WHERE i.product_id = p.id ORDER BY i.is_main DESC, i.id LIMIT 1) AS main_image,
     (SELECT AVG(r.stars) FROM ratings r WHERE r.product_id = p.id) AS average_rating,
     (SELECT COUNT(*) FROM ratings r WHERE r.product_id = p.id) AS rating_count";

const CARD_FROM: &str = "FROM products p
     JOIN categories c ON c.id = p.category_id
     JOIN users u ON u.id = p.owner_id
     LEFT JOIN colleges col ON col.id = u.college_id";

const LISTING_COLUMNS: &str =
    "id, product_id, seller_id, price_cents, condition, description, discount_cents, status, posted_at";

const RATING_COLUMNS: &str = "id, user_id, product_id, stars, comment, created_at";

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get("id")?,
        name: row.get("name")?,
        category_id: row.get("category_id")?,
        price: get_money(row, "price_cents")?,
        owner_id: row.get("owner_id")?,
        is_approved: row.get("is_approved")?,
        approved_at: get_opt_ts(row, "approved_at")?,
        is_sold: row.get("is_sold")?,
        is_featured: row.get("is_featured")?,
        is_for_rent: row.get("is_for_rent")?,
        price_per_day: get_opt_money(row, "price_per_day_cents")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<ProductCard> {
    Ok(ProductCard {
        product: product_from_row(row)?,
        category_name: row.get("category_name")?,
        owner_name: row.get("owner_name")?,
        owner_college: row.get("owner_college")?,
        main_image: row.get("main_image")?,
        average_rating: row.get("average_rating")?,
        rating_count: row.get("rating_count")?,
    })
}

pub(crate) fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: row.get("id")?,
        product_id: row.get("product_id")?,
        seller_id: row.get("seller_id")?,
        price: get_money(row, "price_cents")?,
        condition: get_enum(row, "condition")?,
        description: row.get("description")?,
        discount: get_money(row, "discount_cents")?,
        status: get_enum(row, "status")?,
        posted_at: get_ts(row, "posted_at")?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ProductImage> {
    Ok(ProductImage {
        id: row.get("id")?,
        product_id: row.get("product_id")?,
        image_url: row.get("image_url")?,
        is_main: row.get("is_main")?,
    })
}

fn rating_from_row(row: &Row<'_>) -> rusqlite::Result<Rating> {
    Ok(Rating {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        product_id: row.get("product_id")?,
        stars: row.get("stars")?,
        comment: row.get("comment")?,
        created_at: get_ts(row, "created_at")?,
    })
}

pub(crate) fn fetch_product(conn: &Connection, id: Id) -> Result<Option<Product>> {
    let sql = format!("SELECT {} FROM products p WHERE p.id = ?1", PRODUCT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], product_from_row).optional()?)
}

pub(crate) fn fetch_listing(conn: &Connection, id: Id) -> Result<Option<Listing>> {
    let sql = format!("SELECT {} FROM listings WHERE id = ?1", LISTING_COLUMNS);
    Ok(conn.query_row(&sql, params![id], listing_from_row).optional()?)
}

fn fetch_rating(conn: &Connection, id: Id) -> Result<Option<Rating>> {
    let sql = format!("SELECT {} FROM ratings WHERE id = ?1", RATING_COLUMNS);
    Ok(conn.query_row(&sql, params![id], rating_from_row).optional()?)
}

#[async_trait]
impl CatalogStore for SqliteStorage {
    async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        self.with_conn(|conn| {
            let now = ts(&Utc::now());
            conn.execute(
                "INSERT INTO products (name, category_id, price_cents, owner_id, is_for_rent, price_per_day_cents, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    product.name,
                    product.category_id,
                    product.price.cents(),
                    product.owner_id,
                    product.is_for_rent,
                    product.price_per_day.map(Money::cents),
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            fetch_product(conn, id)?.ok_or_else(|| BazaarError::not_found("product"))
        })
    }

    async fn get_product(&self, id: Id) -> Result<Option<Product>> {
        self.with_conn(|conn| fetch_product(conn, id))
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE products SET name = ?1, category_id = ?2, price_cents = ?3, is_approved = ?4, approved_at = ?5,
                     is_sold = ?6, is_featured = ?7, is_for_rent = ?8, price_per_day_cents = ?9, updated_at = ?10
                 WHERE id = ?11",
                params![
                    product.name,
                    product.category_id,
                    product.price.cents(),
                    product.is_approved,
                    opt_ts(&product.approved_at),
                    product.is_sold,
                    product.is_featured,
                    product.is_for_rent,
                    product.price_per_day.map(Money::cents),
                    ts(&Utc::now()),
                    product.id,
                ],
            )?;
            expect_row(changed, "product")
        })
    }

    async fn delete_product(&self, id: Id) -> Result<()> {
        self.with_tx(|tx| {
            let ordered: i64 =
                tx.query_row("SELECT COUNT(*) FROM order_items WHERE product_id = ?1", params![id], |r| r.get(0))?;
            if ordered > 0 {
                return Err(BazaarError::conflict("product appears in existing orders"));
            }
            let changed = tx.execute("DELETE FROM products WHERE id = ?1", params![id])?;
            expect_row(changed, "product")
        })
    }

    async fn product_card(&self, id: Id) -> Result<Option<ProductCard>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {}, {} {} WHERE p.id = ?1", PRODUCT_COLUMNS, CARD_SELECT, CARD_FROM);
            Ok(conn.query_row(&sql, params![id], card_from_row).optional()?)
        })
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Page<ProductCard>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(term) = non_empty(&filter.query) {
                let pattern = like_pattern(term);
                cond.push("(lower(p.name) LIKE ? ESCAPE '\\' OR lower(COALESCE(col.name, '')) LIKE ? ESCAPE '\\')")
                    .bind(pattern.clone())
                    .bind(pattern);
            }
            if let Some(college_id) = filter.college_id {
                cond.push("u.college_id = ?").bind(college_id);
            }
            if let Some(category_id) = filter.category_id {
                cond.push("p.category_id = ?").bind(category_id);
            }
            if let Some(owner_id) = filter.owner_id {
                cond.push("p.owner_id = ?").bind(owner_id);
            }
            if let Some(excluded) = filter.exclude_owner {
                cond.push("p.owner_id <> ?").bind(excluded);
            }
            if let Some(approved) = filter.approved {
                cond.push("p.is_approved = ?").bind(approved);
            }
            if !filter.include_sold {
                cond.push("p.is_sold = 0");
            }
            let select = format!("SELECT {}, {}", PRODUCT_COLUMNS, CARD_SELECT);
            let from_where = format!("{}{}", CARD_FROM, cond.where_sql());
            paged_query(
                conn,
                &select,
                &from_where,
                "ORDER BY p.is_featured DESC, p.created_at DESC, p.id DESC",
                &cond,
                filter.page,
                card_from_row,
            )
        })
    }

    async fn count_order_items_for_product(&self, id: Id) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM order_items WHERE product_id = ?1", params![id], |r| r.get(0))?)
        })
    }

    async fn add_image(&self, product_id: Id, image_url: &str, is_main: bool) -> Result<ProductImage> {
        self.with_tx(|tx| {
            if is_main {
                tx.execute("UPDATE product_images SET is_main = 0 WHERE product_id = ?1", params![product_id])?;
            }
            tx.execute(
                "INSERT INTO product_images (product_id, image_url, is_main) VALUES (?1, ?2, ?3)",
                params![product_id, image_url, is_main],
            )?;
            Ok(ProductImage { id: tx.last_insert_rowid(), product_id, image_url: image_url.to_string(), is_main })
        })
    }

    async fn get_image(&self, id: Id) -> Result<Option<ProductImage>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, product_id, image_url, is_main FROM product_images WHERE id = ?1",
                    params![id],
                    image_from_row,
                )
                .optional()?)
        })
    }

    async fn delete_image(&self, id: Id) -> Result<()> {
        self.with_tx(|tx| {
            let image = tx
                .query_row(
                    "SELECT id, product_id, image_url, is_main FROM product_images WHERE id = ?1",
                    params![id],
                    image_from_row,
                )
                .optional()?
                .ok_or_else(|| BazaarError::not_found("image"))?;
            tx.execute("DELETE FROM product_images WHERE id = ?1", params![id])?;
            if image.is_main {
                // promote the oldest remaining image
                tx.execute(
                    "UPDATE product_images SET is_main = 1
                     WHERE id = (SELECT id FROM product_images WHERE product_id = ?1 ORDER BY id LIMIT 1)",
                    params![image.product_id],
                )?;
            }
            Ok(())
        })
    }

    async fn set_main_image(&self, product_id: Id, image_id: Id) -> Result<()> {
        self.with_tx(|tx| {
            let owned: i64 = tx.query_row(
                "SELECT COUNT(*) FROM product_images WHERE id = ?1 AND product_id = ?2",
                params![image_id, product_id],
                |r| r.get(0),
            )?;
            if owned == 0 {
                return Err(BazaarError::not_found("image"));
            }
            tx.execute(
                "UPDATE product_images SET is_main = (id = ?1) WHERE product_id = ?2",
                params![image_id, product_id],
            )?;
            Ok(())
        })
    }

    async fn images_for_product(&self, product_id: Id) -> Result<Vec<ProductImage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, image_url, is_main FROM product_images WHERE product_id = ?1
                 ORDER BY is_main DESC, id",
            )?;
            let rows = stmt.query_map(params![product_id], image_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn create_listing(&self, listing: &NewListing) -> Result<Listing> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings (product_id, seller_id, price_cents, condition, description, discount_cents, status, posted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    listing.product_id,
                    listing.seller_id,
                    listing.price.cents(),
                    listing.condition.as_str(),
                    listing.description,
                    listing.discount.cents(),
                    listing.status.as_str(),
                    ts(&Utc::now()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            fetch_listing(conn, id)?.ok_or_else(|| BazaarError::not_found("listing"))
        })
    }

    async fn get_listing(&self, id: Id) -> Result<Option<Listing>> {
        self.with_conn(|conn| fetch_listing(conn, id))
    }

    async fn update_listing(&self, listing: &Listing) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET price_cents = ?1, condition = ?2, description = ?3, discount_cents = ?4, status = ?5
                 WHERE id = ?6",
                params![
                    listing.price.cents(),
                    listing.condition.as_str(),
                    listing.description,
                    listing.discount.cents(),
                    listing.status.as_str(),
                    listing.id,
                ],
            )?;
            expect_row(changed, "listing")
        })
    }

    async fn delete_listing(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM listings WHERE id = ?1", params![id])?;
            expect_row(changed, "listing")
        })
    }

    async fn list_listings(&self) -> Result<Vec<Listing>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM listings ORDER BY posted_at DESC, id DESC", LISTING_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], listing_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn listings_for_product(&self, product_id: Id) -> Result<Vec<Listing>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM listings WHERE product_id = ?1 ORDER BY id", LISTING_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![product_id], listing_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn upsert_rating(&self, user_id: Id, product_id: Id, stars: i64, comment: Option<&str>) -> Result<Rating> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ratings (user_id, product_id, stars, comment, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, product_id) DO UPDATE SET
                     stars = excluded.stars, comment = excluded.comment, created_at = excluded.created_at",
                params![user_id, product_id, stars, comment, ts(&Utc::now())],
            )?;
            let sql = format!("SELECT {} FROM ratings WHERE user_id = ?1 AND product_id = ?2", RATING_COLUMNS);
            Ok(conn.query_row(&sql, params![user_id, product_id], rating_from_row)?)
        })
    }

    async fn get_rating(&self, id: Id) -> Result<Option<Rating>> {
        self.with_conn(|conn| fetch_rating(conn, id))
    }

    async fn update_rating(&self, rating: &Rating) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE ratings SET stars = ?1, comment = ?2 WHERE id = ?3",
                params![rating.stars, rating.comment, rating.id],
            )?;
            expect_row(changed, "rating")
        })
    }

    async fn delete_rating(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM ratings WHERE id = ?1", params![id])?;
            expect_row(changed, "rating")
        })
    }

    async fn list_ratings(&self, product_id: Option<Id>) -> Result<Vec<Rating>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM ratings WHERE (?1 IS NULL OR product_id = ?1) ORDER BY created_at DESC, id DESC",
                RATING_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![product_id], rating_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::storage::{AcademicStore, UserStore};

    #[tokio::test]
    async fn browse_filters_unapproved_sold_and_own() {
        let store = storage();
        let seller = user(&store, "seller@uni.edu").await;
        let viewer = user(&store, "viewer@uni.edu").await;
        let books = category(&store, "Books").await;

        approved_product(&store, seller.id, books.id, "Physics Textbook", 2000).await;
        product(&store, seller.id, books.id, "Pending Notes", 500).await;
        let mut sold = approved_product(&store, seller.id, books.id, "Sold Lamp", 900).await;
        sold.is_sold = true;
        store.update_product(&sold).await.unwrap();
        approved_product(&store, viewer.id, books.id, "Viewer's Own", 100).await;

        let page = store
            .list_products(&ProductFilter { approved: Some(true), exclude_owner: Some(viewer.id), ..Default::default() })
            .await
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|c| c.product.name.as_str()).collect();
        assert_eq!(names, vec!["Physics Textbook"]);
    }

    #[tokio::test]
    async fn query_matches_owner_college() {
        let store = storage();
        let uni = store.create_university("Cairo University", "Giza").await.unwrap();
        let eng = store.create_college("Faculty of Engineering", uni.id).await.unwrap();
        let seller = user(&store, "eng@uni.edu").await;
        store
            .update_profile(
                seller.id,
                &ProfileUpdate {
                    full_name: seller.full_name.clone(),
                    email: seller.email.clone(),
                    university_id: Some(uni.id),
                    college_id: Some(eng.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let cat = category(&store, "Tools").await;
        approved_product(&store, seller.id, cat.id, "Drafting Set", 3000).await;

        let by_college = store
            .list_products(&ProductFilter { query: Some("engineering".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_college.total_count, 1);
        assert_eq!(by_college.items[0].owner_college.as_deref(), Some("Faculty of Engineering"));

        let by_id = store
            .list_products(&ProductFilter { college_id: Some(eng.id), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_id.total_count, 1);
    }

    #[tokio::test]
    async fn main_image_switches_and_promotes() {
        let store = storage();
        let owner = user(&store, "img@uni.edu").await;
        let cat = category(&store, "Misc").await;
        let p = product(&store, owner.id, cat.id, "Chair", 1000).await;
        let first = store.add_image(p.id, "/images/products/a.png", true).await.unwrap();
        let second = store.add_image(p.id, "/images/products/b.png", false).await.unwrap();

        store.set_main_image(p.id, second.id).await.unwrap();
        let images = store.images_for_product(p.id).await.unwrap();
        assert_eq!(images.iter().filter(|i| i.is_main).count(), 1);
        assert_eq!(images[0].id, second.id);

        store.delete_image(second.id).await.unwrap();
        let images = store.images_for_product(p.id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].is_main);
        assert_eq!(images[0].id, first.id);
    }

    #[tokio::test]
    async fn product_delete_cascades_listings_and_ratings() {
        let store = storage();
        let owner = user(&store, "cascade@uni.edu").await;
        let rater = user(&store, "rater@uni.edu").await;
        let cat = category(&store, "Bikes").await;
        let p = approved_product(&store, owner.id, cat.id, "Bike", 50000).await;
        let l = listing(&store, &p).await;
        let r = store.upsert_rating(rater.id, p.id, 4, Some("solid")).await.unwrap();

        store.delete_product(p.id).await.unwrap();
        assert!(store.get_listing(l.id).await.unwrap().is_none());
        assert!(store.get_rating(r.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rating_upsert_replaces_previous() {
        let store = storage();
        let owner = user(&store, "o@uni.edu").await;
        let rater = user(&store, "r@uni.edu").await;
        let cat = category(&store, "Phones").await;
        let p = approved_product(&store, owner.id, cat.id, "Phone", 150000).await;

        let first = store.upsert_rating(rater.id, p.id, 2, None).await.unwrap();
        let second = store.upsert_rating(rater.id, p.id, 5, Some("changed my mind")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_ratings(Some(p.id)).await.unwrap().len(), 1);

        let card = store.product_card(p.id).await.unwrap().unwrap();
        assert_eq!(card.rating_count, 1);
        assert_eq!(card.average_rating, Some(5.0));
    }
}
