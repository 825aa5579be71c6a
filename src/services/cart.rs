use serde::Serialize;
use tracing::{debug, info};

use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub subtotal: Money,
    pub item_count: i64,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reply to a quantity change, amounts already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityUpdate {
    pub item_id: Id,
    pub quantity: i64,
    pub line_total: String,
    pub cart_total: String,
}

impl Marketplace {
    fn clamp_quantity(&self, quantity: i64) -> i64 {
        quantity.clamp(1, self.settings.max_cart_quantity.max(1))
    }

    pub async fn cart(&self, user_id: Id) -> Result<CartView> {
        let lines = self.storage.cart_lines(user_id).await?;
        let subtotal = lines.iter().map(CartLine::line_total).sum();
        let item_count = lines.iter().map(|l| l.item.quantity).sum();
        Ok(CartView { lines, subtotal, item_count })
    }

    /// Adds a listing, merging with an existing line. The merged quantity is capped.
    pub async fn add_listing_to_cart(&self, user: &User, listing_id: Id, quantity: i64) -> Result<CartItem> {
        let listing = self.listing(listing_id).await?;
        if listing.status != ListingStatus::Available {
            return Err(BazaarError::conflict("This listing is no longer available"));
        }
        let product = self.product(listing.product_id).await?;
        if !product.is_purchasable() {
            return Err(BazaarError::conflict("This product is not available for purchase"));
        }
        if listing.seller_id == user.id || product.owner_id == user.id {
            return Err(BazaarError::forbidden("you cannot add your own listing to the cart"));
        }

        let quantity = self.clamp_quantity(quantity);
        let item = match self.storage.find_cart_item(user.id, listing_id).await? {
            Some(existing) => {
                let merged = self.clamp_quantity(existing.quantity.saturating_add(quantity));
                self.storage.set_cart_quantity(existing.id, merged).await?;
                CartItem { quantity: merged, ..existing }
            }
            None => self.storage.insert_cart_item(user.id, listing_id, quantity).await?,
        };
        debug!(user_id = user.id, listing_id, quantity = item.quantity, "Cart updated");
        Ok(item)
    }

    /// Adds a product by picking one of its listings, creating one if it has none.
    pub async fn add_product_to_cart(&self, user: &User, product_id: Id) -> Result<CartItem> {
        let product = self.product(product_id).await?;
        if product.owner_id == user.id {
            return Err(BazaarError::forbidden("you cannot add your own product to the cart"));
        }
        if !product.is_purchasable() {
            return Err(BazaarError::conflict("This product is not available for purchase"));
        }

        let listings = self.storage.listings_for_product(product_id).await?;
        let listing = if let Some(available) = listings.iter().find(|l| l.status == ListingStatus::Available) {
            available.clone()
        } else if let Some(first) = listings.into_iter().next() {
            let listing = Listing { status: ListingStatus::Available, ..first };
            self.storage.update_listing(&listing).await?;
            listing
        } else {
            let listing = self
                .storage
                .create_listing(&NewListing {
                    product_id,
                    seller_id: product.owner_id,
                    price: product.price,
                    condition: ListingCondition::New,
                    description: format!("Auto-generated listing for {}", product.name),
                    discount: Money::ZERO,
                    status: ListingStatus::Available,
                })
                .await?;
            info!(product_id, listing_id = listing.id, "Created listing for cart");
            listing
        };
        self.add_listing_to_cart(user, listing.id, 1).await
    }

    async fn own_cart_item(&self, user: &User, item_id: Id) -> Result<CartItem> {
        let item = self.storage.get_cart_item(item_id).await?.ok_or_else(|| BazaarError::not_found("cart item"))?;
        if item.user_id != user.id {
            return Err(BazaarError::forbidden("this cart item belongs to someone else"));
        }
        Ok(item)
    }

    pub async fn remove_from_cart(&self, user: &User, item_id: Id) -> Result<()> {
        self.own_cart_item(user, item_id).await?;
        self.storage.delete_cart_item(item_id).await
    }

    pub async fn update_cart_quantity(&self, user: &User, item_id: Id, quantity: i64) -> Result<QuantityUpdate> {
        self.own_cart_item(user, item_id).await?;
        let quantity = self.clamp_quantity(quantity);
        self.storage.set_cart_quantity(item_id, quantity).await?;

        let cart = self.cart(user.id).await?;
        let line_total = cart
            .lines
            .iter()
            .find(|l| l.item.id == item_id)
            .map(CartLine::line_total)
            .unwrap_or_default();
        Ok(QuantityUpdate {
            item_id,
            quantity,
            line_total: line_total.to_string(),
            cart_total: cart.subtotal.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    #[tokio::test]
    async fn adding_twice_merges_and_caps() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let (_, listing) = for_sale(&m, &seller, books.id, "Novel", 250).await;

        let first = m.add_listing_to_cart(&buyer, listing.id, 0).await.unwrap();
        assert_eq!(first.quantity, 1);
        let merged = m.add_listing_to_cart(&buyer, listing.id, 25).await.unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.quantity, 10);

        let cart = m.cart(buyer.id).await.unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.subtotal, Money::from_cents(2500));
    }

    #[tokio::test]
    async fn huge_quantities_are_capped() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let (_, listing) = for_sale(&m, &seller, books.id, "Novel", 250).await;

        m.add_listing_to_cart(&buyer, listing.id, 1).await.unwrap();
        let merged = m.add_listing_to_cart(&buyer, listing.id, i64::MAX).await.unwrap();
        assert_eq!(merged.quantity, 10);

        let again = m.add_listing_to_cart(&buyer, listing.id, i64::MAX).await.unwrap();
        assert_eq!(again.quantity, 10);
    }

    #[tokio::test]
    async fn own_and_unavailable_listings_are_refused() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let (_, mut listing) = for_sale(&m, &seller, books.id, "Poster", 100).await;

        assert!(matches!(
            m.add_listing_to_cart(&seller, listing.id, 1).await.unwrap_err(),
            BazaarError::Forbidden(_)
        ));

        listing.status = ListingStatus::Hidden;
        m.storage.update_listing(&listing).await.unwrap();
        assert!(matches!(
            m.add_listing_to_cart(&buyer, listing.id, 1).await.unwrap_err(),
            BazaarError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn add_product_creates_a_listing_when_none_exist() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let mut product = m
            .storage
            .create_product(&NewProduct {
                name: "Kettle".into(),
                category_id: books.id,
                price: Money::from_cents(1999),
                owner_id: seller.id,
                is_for_rent: false,
                price_per_day: None,
            })
            .await
            .unwrap();
        product.is_approved = true;
        m.storage.update_product(&product).await.unwrap();

        let item = m.add_product_to_cart(&buyer, product.id).await.unwrap();
        let listing = m.listing(item.listing_id).await.unwrap();
        assert_eq!(listing.seller_id, seller.id);
        assert_eq!(listing.price, Money::from_cents(1999));
        assert_eq!(listing.condition, ListingCondition::New);
        assert_eq!(listing.description, "Auto-generated listing for Kettle");
    }

    #[tokio::test]
    async fn add_product_reopens_an_existing_listing() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, mut listing) = for_sale(&m, &seller, books.id, "Chair", 3000).await;
        listing.status = ListingStatus::Reserved;
        m.storage.update_listing(&listing).await.unwrap();

        let item = m.add_product_to_cart(&buyer, product.id).await.unwrap();
        assert_eq!(item.listing_id, listing.id);
        assert_eq!(m.listing(listing.id).await.unwrap().status, ListingStatus::Available);
    }

    #[tokio::test]
    async fn quantity_updates_report_formatted_totals() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let stranger = student(&m, "x@uni.edu").await;
        let books = category(&m, "Books").await;
        let (_, a) = for_sale(&m, &seller, books.id, "Pen", 150).await;
        let (_, b) = for_sale(&m, &seller, books.id, "Ruler", 1000).await;
        let item = m.add_listing_to_cart(&buyer, a.id, 1).await.unwrap();
        m.add_listing_to_cart(&buyer, b.id, 1).await.unwrap();

        let update = m.update_cart_quantity(&buyer, item.id, 3).await.unwrap();
        assert_eq!(update.line_total, "4.50");
        assert_eq!(update.cart_total, "14.50");

        let clamped = m.update_cart_quantity(&buyer, item.id, 99).await.unwrap();
        assert_eq!(clamped.quantity, 10);

        assert!(m.update_cart_quantity(&stranger, item.id, 1).await.is_err());
        assert!(m.remove_from_cart(&stranger, item.id).await.is_err());
        m.remove_from_cart(&buyer, item.id).await.unwrap();
        assert_eq!(m.cart(buyer.id).await.unwrap().lines.len(), 1);
    }
}
