//! Products, their images, listings and ratings.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::notifications::AdminAlert;
use super::validation::Validator;
use super::{Marketplace, Upload};
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::hub::HubPayload;
use crate::metrics;

pub const STOREFRONT_PAGE_SIZE: i64 = 12;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseQuery {
    pub q: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub college_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub category_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductForm {
    pub name: String,
    pub category_id: Option<Id>,
    pub price: Option<Money>,
    pub is_for_rent: bool,
    pub price_per_day: Option<Money>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetails {
    pub card: ProductCard,
    pub images: Vec<ProductImage>,
    pub listings: Vec<Listing>,
    pub ratings: Vec<Rating>,
    pub can_manage: bool,
    pub has_available_listing: bool,
}

impl ProductDetails {
    pub fn available_listing(&self) -> Option<&Listing> {
        self.listings.iter().find(|l| l.status == ListingStatus::Available)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingInput {
    pub product_id: Id,
    pub price: Money,
    pub condition: ListingCondition,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discount: Money,
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingInput {
    pub product_id: Id,
    pub stars: i64,
    pub comment: Option<String>,
}

fn check_listing(input: &ListingInput) -> Result<()> {
    Validator::new()
        .check(input.price.in_price_range(), "Price must be between 0.01 and 999999.99")
        .check(input.discount >= Money::ZERO, "Discount cannot be negative")
        .check(input.discount <= input.price, "Discount cannot exceed the price")
        .max_len("Description", &input.description, 2000)
        .finish()
}

fn check_stars(stars: i64) -> Result<()> {
    Validator::new().check((1..=5).contains(&stars), "Rating must be between 1 and 5 stars").finish()
}

impl Marketplace {
    /// Storefront listing. Non-admins only see approved, unsold goods, and
    /// nobody sees their own products here.
    pub async fn browse(&self, viewer: Option<&User>, query: BrowseQuery) -> Result<Page<ProductCard>> {
        let is_admin = viewer.is_some_and(User::is_admin);
        let filter = ProductFilter {
            query: query.q,
            college_id: query.college_id,
            category_id: query.category_id,
            owner_id: None,
            exclude_owner: viewer.map(|u| u.id),
            approved: if is_admin { None } else { Some(true) },
            include_sold: is_admin,
            page: Some(PageRequest::new(query.page, None, STOREFRONT_PAGE_SIZE)),
        };
        self.storage.list_products(&filter).await
    }

    pub async fn my_products(&self, owner: &User, q: Option<String>) -> Result<Vec<ProductCard>> {
        let filter = ProductFilter { query: q, owner_id: Some(owner.id), include_sold: true, ..Default::default() };
        Ok(self.storage.list_products(&filter).await?.items)
    }

    pub async fn product(&self, id: Id) -> Result<Product> {
        self.storage.get_product(id).await?.ok_or_else(|| BazaarError::not_found("product"))
    }

    /// Products awaiting approval are hidden from everyone but their owner and admins.
    pub async fn product_details(&self, viewer: Option<&User>, id: Id) -> Result<ProductDetails> {
        let card = self.storage.product_card(id).await?.ok_or_else(|| BazaarError::not_found("product"))?;
        let can_manage = viewer.is_some_and(|u| card.product.can_be_managed_by(u));
        if !card.product.is_approved && !can_manage {
            return Err(BazaarError::not_found("product"));
        }
        let images = self.storage.images_for_product(id).await?;
        let listings = self.storage.listings_for_product(id).await?;
        let ratings = self.storage.list_ratings(Some(id)).await?;
        let has_available_listing = listings.iter().any(|l| l.status == ListingStatus::Available);
        Ok(ProductDetails { card, images, listings, ratings, can_manage, has_available_listing })
    }

    async fn check_product_form(&self, form: &ProductForm) -> Result<()> {
        let name = form.name.trim();
        let mut v = Validator::new();
        v.required("Name", name)
            .max_len("Name", name, 250)
            .check(form.category_id.is_some(), "Category is required")
            .check(
                form.price.is_some_and(Money::in_price_range),
                "Price must be between 0.01 and 999999.99",
            );
        if form.is_for_rent {
            v.check(
                form.price_per_day.is_some_and(Money::is_positive),
                "Price per day is required for rentals",
            );
        }
        v.finish()?;
        if let Some(category_id) = form.category_id {
            if self.storage.get_category(category_id).await?.is_none() {
                return Err(BazaarError::invalid("Selected category does not exist"));
            }
        }
        Ok(())
    }

    pub async fn create_product(&self, owner: &User, form: ProductForm, images: Vec<Upload>) -> Result<Product> {
        self.check_product_form(&form).await?;
        self.uploads.check_images(&images)?;

        let product = self
            .storage
            .create_product(&NewProduct {
                name: form.name.trim().to_string(),
                category_id: form.category_id.unwrap_or_default(),
                price: form.price.unwrap_or_default(),
                owner_id: owner.id,
                is_for_rent: form.is_for_rent,
                price_per_day: if form.is_for_rent { form.price_per_day } else { None },
            })
            .await?;
        self.store_images(product.id, &images, true).await?;

        metrics::product_created();
        info!(product_id = product.id, owner_id = owner.id, "Product created");
        self.log_activity(NewActivity::new("CreateProduct", Some(owner.id)).entity("Product", product.id)).await;
        self.alert_admins(
            AdminAlert::new(
                "New Product",
                format!("{} added a new product: {}", owner.full_name, product.name),
            )
            .link(format!("/admin/products/{}", product.id))
            .event(HubPayload::NewProduct { product_id: product.id }),
        )
        .await;
        Ok(product)
    }

    /// Saves uploads in order. The first becomes main when the product has none yet.
    async fn store_images(&self, product_id: Id, images: &[Upload], first_is_main: bool) -> Result<Vec<ProductImage>> {
        let mut stored = Vec::with_capacity(images.len());
        for (i, upload) in images.iter().enumerate() {
            let url = self.uploads.save_product_image(upload).await?;
            stored.push(self.storage.add_image(product_id, &url, first_is_main && i == 0).await?);
        }
        Ok(stored)
    }

    async fn managed_product(&self, user: &User, id: Id) -> Result<Product> {
        let product = self.product(id).await?;
        if !product.can_be_managed_by(user) {
            return Err(BazaarError::forbidden("only the owner or an admin can change this product"));
        }
        Ok(product)
    }

    pub async fn update_product(&self, user: &User, id: Id, form: ProductForm) -> Result<Product> {
        let mut product = self.managed_product(user, id).await?;
        self.check_product_form(&form).await?;
        product.name = form.name.trim().to_string();
        product.category_id = form.category_id.unwrap_or(product.category_id);
        product.price = form.price.unwrap_or(product.price);
        product.is_for_rent = form.is_for_rent;
        product.price_per_day = if form.is_for_rent { form.price_per_day } else { None };
        self.storage.update_product(&product).await?;
        self.log_activity(NewActivity::new("UpdateProduct", Some(user.id)).entity("Product", id)).await;
        self.product(id).await
    }

    pub async fn delete_product(&self, user: &User, id: Id) -> Result<()> {
        self.managed_product(user, id).await?;
        self.remove_product(id).await?;
        self.log_activity(NewActivity::new("DeleteProduct", Some(user.id)).entity("Product", id)).await;
        Ok(())
    }

    /// Deletes the row, then its image files.
    pub(crate) async fn remove_product(&self, id: Id) -> Result<()> {
        let images = self.storage.images_for_product(id).await?;
        self.storage.delete_product(id).await?;
        for image in images {
            self.uploads.remove(&image.image_url).await;
        }
        info!(product_id = id, "Product deleted");
        Ok(())
    }

    pub async fn add_product_images(&self, user: &User, product_id: Id, images: Vec<Upload>) -> Result<Vec<ProductImage>> {
        self.managed_product(user, product_id).await?;
        self.uploads.check_images(&images)?;
        let has_main = self.storage.images_for_product(product_id).await?.iter().any(|i| i.is_main);
        self.store_images(product_id, &images, !has_main).await
    }

    /// Returns the product the image belonged to.
    pub async fn delete_product_image(&self, user: &User, image_id: Id) -> Result<Id> {
        let image = self.storage.get_image(image_id).await?.ok_or_else(|| BazaarError::not_found("image"))?;
        self.managed_product(user, image.product_id).await?;
        self.storage.delete_image(image_id).await?;
        self.uploads.remove(&image.image_url).await;
        Ok(image.product_id)
    }

    pub async fn set_main_product_image(&self, user: &User, product_id: Id, image_id: Id) -> Result<()> {
        self.managed_product(user, product_id).await?;
        self.storage.set_main_image(product_id, image_id).await
    }

    // Listings

    pub async fn listings(&self) -> Result<Vec<Listing>> {
        self.storage.list_listings().await
    }

    pub async fn listing(&self, id: Id) -> Result<Listing> {
        self.storage.get_listing(id).await?.ok_or_else(|| BazaarError::not_found("listing"))
    }

    /// The product owner is always the seller.
    pub async fn create_listing(&self, user: &User, input: ListingInput) -> Result<Listing> {
        check_listing(&input)?;
        let product = self.managed_product(user, input.product_id).await?;
        self.storage
            .create_listing(&NewListing {
                product_id: product.id,
                seller_id: product.owner_id,
                price: input.price,
                condition: input.condition,
                description: input.description.trim().to_string(),
                discount: input.discount,
                status: input.status.unwrap_or(ListingStatus::Available),
            })
            .await
    }

    pub async fn update_listing(&self, user: &User, id: Id, input: ListingInput) -> Result<Listing> {
        check_listing(&input)?;
        let mut listing = self.listing(id).await?;
        if listing.seller_id != user.id && !user.is_admin() {
            return Err(BazaarError::forbidden("only the seller or an admin can change this listing"));
        }
        listing.price = input.price;
        listing.condition = input.condition;
        listing.description = input.description.trim().to_string();
        listing.discount = input.discount;
        if let Some(status) = input.status {
            listing.status = status;
        }
        self.storage.update_listing(&listing).await?;
        Ok(listing)
    }

    pub async fn delete_listing(&self, user: &User, id: Id) -> Result<()> {
        let listing = self.listing(id).await?;
        if listing.seller_id != user.id && !user.is_admin() {
            return Err(BazaarError::forbidden("only the seller or an admin can delete this listing"));
        }
        self.storage.delete_listing(id).await
    }

    // Ratings

    pub async fn ratings(&self, product_id: Option<Id>) -> Result<Vec<Rating>> {
        self.storage.list_ratings(product_id).await
    }

    pub async fn rating(&self, id: Id) -> Result<Rating> {
        self.storage.get_rating(id).await?.ok_or_else(|| BazaarError::not_found("rating"))
    }

    /// One rating per user and product; rating again replaces the earlier one.
    pub async fn rate_product(&self, user: &User, input: RatingInput) -> Result<Rating> {
        check_stars(input.stars)?;
        self.product(input.product_id).await?;
        let comment = input.comment.as_deref().map(str::trim).filter(|c| !c.is_empty());
        if let Some(comment) = comment {
            Validator::new().max_len("Comment", comment, 1000).finish()?;
        }
        self.storage.upsert_rating(user.id, input.product_id, input.stars, comment).await
    }

    pub async fn update_rating(&self, user: &User, id: Id, stars: i64, comment: Option<String>) -> Result<Rating> {
        check_stars(stars)?;
        let mut rating = self.rating(id).await?;
        if rating.user_id != user.id {
            return Err(BazaarError::forbidden("you can only edit your own rating"));
        }
        rating.stars = stars;
        rating.comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        self.storage.update_rating(&rating).await?;
        Ok(rating)
    }

    pub async fn delete_rating(&self, user: &User, id: Id) -> Result<()> {
        let rating = self.rating(id).await?;
        if rating.user_id != user.id && !user.is_admin() {
            return Err(BazaarError::forbidden("you can only delete your own rating"));
        }
        self.storage.delete_rating(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    fn form(name: &str, category_id: Id, cents: i64) -> ProductForm {
        ProductForm {
            name: name.into(),
            category_id: Some(category_id),
            price: Some(Money::from_cents(cents)),
            ..Default::default()
        }
    }

    fn png(name: &str) -> Upload {
        Upload { file_name: name.into(), bytes: vec![0x89, 0x50] }
    }

    #[tokio::test]
    async fn new_products_start_unapproved_and_alert_admins() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let owner = student(&m, "o@uni.edu").await;
        let books = category(&m, "Books").await;

        let product = m
            .create_product(&owner, form("Organic Chemistry", books.id, 4500), vec![png("a.png"), png("b.jpg")])
            .await
            .unwrap();
        assert!(!product.is_approved);

        let images = m.storage.images_for_product(product.id).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images.iter().filter(|i| i.is_main).count(), 1);

        let alerts = m.storage.recent_notifications(root.id, 10).await.unwrap();
        assert_eq!(alerts[0].title, "New Product");
        assert_eq!(alerts[0].link_url.as_deref(), Some(format!("/admin/products/{}", product.id).as_str()));
    }

    #[tokio::test]
    async fn product_form_is_validated() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let books = category(&m, "Books").await;

        let err = m.create_product(&owner, form("Free", books.id, 0), vec![]).await.unwrap_err();
        assert!(matches!(err, BazaarError::Validation(_)));

        let mut rent = form("Tent", books.id, 1000);
        rent.is_for_rent = true;
        assert!(m.create_product(&owner, rent.clone(), vec![]).await.is_err());
        rent.price_per_day = Some(Money::from_cents(200));
        assert!(m.create_product(&owner, rent, vec![]).await.is_ok());

        assert!(m.create_product(&owner, form("Ghost", 999, 100), vec![]).await.is_err());
        assert!(m.create_product(&owner, form("Script", books.id, 100), vec![png("x.exe")]).await.is_err());
    }

    #[tokio::test]
    async fn unapproved_products_are_hidden_from_strangers() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let stranger = student(&m, "s@uni.edu").await;
        let root = admin(&m, "root@uni.edu").await;
        let books = category(&m, "Books").await;
        let product = m.create_product(&owner, form("Atlas", books.id, 900), vec![]).await.unwrap();

        assert!(matches!(
            m.product_details(Some(&stranger), product.id).await.unwrap_err(),
            BazaarError::NotFound(_)
        ));
        assert!(m.product_details(None, product.id).await.is_err());
        assert!(m.product_details(Some(&owner), product.id).await.unwrap().can_manage);
        assert!(m.product_details(Some(&root), product.id).await.unwrap().can_manage);
    }

    #[tokio::test]
    async fn browse_hides_own_and_unapproved_products() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let viewer = student(&m, "viewer@uni.edu").await;
        let root = admin(&m, "root@uni.edu").await;
        let books = category(&m, "Books").await;
        for_sale(&m, &seller, books.id, "Statistics", 1200).await;
        for_sale(&m, &viewer, books.id, "Mine", 1200).await;
        m.create_product(&seller, form("Pending", books.id, 500), vec![]).await.unwrap();

        let page = m.browse(Some(&viewer), BrowseQuery::default()).await.unwrap();
        let names: Vec<_> = page.items.iter().map(|c| c.product.name.as_str()).collect();
        assert_eq!(names, vec!["Statistics"]);

        let anonymous = m.browse(None, BrowseQuery::default()).await.unwrap();
        assert_eq!(anonymous.total_count, 2);

        let everything = m.browse(Some(&root), BrowseQuery::default()).await.unwrap();
        assert_eq!(everything.total_count, 3);

        assert_eq!(m.my_products(&seller, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn browse_past_the_last_page_is_empty() {
        let m = market();
        let seller = student(&m, "seller@uni.edu").await;
        let books = category(&m, "Books").await;
        for_sale(&m, &seller, books.id, "Statistics", 1200).await;

        let page = m.browse(None, BrowseQuery { page: Some(i64::MAX), ..Default::default() }).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 1);
        assert_eq!(page.page, MAX_PAGE);
    }

    #[tokio::test]
    async fn only_owner_or_admin_can_edit() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let other = student(&m, "x@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Lamp", 700).await;

        let err = m.update_product(&other, product.id, form("Mine now", books.id, 1)).await.unwrap_err();
        assert!(matches!(err, BazaarError::Forbidden(_)));

        let updated = m.update_product(&owner, product.id, form("Desk Lamp", books.id, 800)).await.unwrap();
        assert_eq!(updated.name, "Desk Lamp");
        assert_eq!(updated.price, Money::from_cents(800));

        assert!(m.delete_product(&other, product.id).await.is_err());
        m.delete_product(&owner, product.id).await.unwrap();
        assert!(m.product(product.id).await.is_err());
    }

    #[tokio::test]
    async fn sold_products_stay_for_order_history() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let buyer = student(&m, "b@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, listing) = for_sale(&m, &owner, books.id, "Globe", 1100).await;
        m.buy_now(&buyer, listing.id).await.unwrap();

        let err = m.delete_product(&owner, product.id).await.unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
        assert!(m.product(product.id).await.is_ok());
    }

    #[tokio::test]
    async fn image_management() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Camera", 90000).await;

        let added = m.add_product_images(&owner, product.id, vec![png("1.png"), png("2.png")]).await.unwrap();
        assert!(added[0].is_main);
        assert!(!added[1].is_main);

        m.set_main_product_image(&owner, product.id, added[1].id).await.unwrap();
        let images = m.storage.images_for_product(product.id).await.unwrap();
        assert!(images.iter().find(|i| i.id == added[1].id).unwrap().is_main);

        let path = m.uploads.path_for(&added[1].image_url).unwrap();
        assert!(path.exists());
        assert_eq!(m.delete_product_image(&owner, added[1].id).await.unwrap(), product.id);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ratings_are_one_per_user() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let rater = student(&m, "r@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Guitar", 30000).await;

        let bad = RatingInput { product_id: product.id, stars: 6, comment: None };
        assert!(m.rate_product(&rater, bad).await.is_err());

        m.rate_product(&rater, RatingInput { product_id: product.id, stars: 2, comment: None }).await.unwrap();
        let again = m
            .rate_product(&rater, RatingInput { product_id: product.id, stars: 5, comment: Some("Great".into()) })
            .await
            .unwrap();
        let all = m.ratings(Some(product.id)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stars, 5);

        assert!(m.delete_rating(&owner, again.id).await.is_err());
        m.delete_rating(&rater, again.id).await.unwrap();
    }

    #[tokio::test]
    async fn listings_are_sold_by_the_product_owner() {
        let m = market();
        let owner = student(&m, "o@uni.edu").await;
        let other = student(&m, "x@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Bike", 50000).await;

        let input = ListingInput {
            product_id: product.id,
            price: Money::from_cents(45000),
            condition: ListingCondition::Fair,
            description: "Needs new tyres".into(),
            discount: Money::from_cents(500),
            status: None,
        };
        assert!(m.create_listing(&other, input.clone()).await.is_err());
        let listing = m.create_listing(&owner, input).await.unwrap();
        assert_eq!(listing.seller_id, owner.id);
        assert_eq!(listing.status, ListingStatus::Available);
        assert!(m.delete_listing(&other, listing.id).await.is_err());
        m.delete_listing(&owner, listing.id).await.unwrap();
    }
}
