//! Back-office actions: product approval, user sanctions, reports,
//! student verification, chat monitoring and the activity log.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::catalog::ProductDetails;
use super::notifications::AdminAlert;
use super::validation::Validator;
use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::hub::HubPayload;
use crate::storage::{BlockInfo, UserStats};

/// Upper bound for a timed suspension.
pub const MAX_SUSPENSION_DAYS: i64 = 3_650;

pub const USER_CSV_HEADER: &str = "Id,Email,FullName,TrustScore,IsVerified,IsSuspended,CreatedAt";
pub const BLOCKED_BY_REPORT: &str = "User blocked due to report.";
pub const REMOVED_BY_REPORT: &str = "Product removed due to report.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminProductQuery {
    pub search: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub category_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub approved: Option<bool>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetails {
    pub user: User,
    pub stats: UserStats,
    pub products: Vec<ProductCard>,
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders users as CSV with a fixed header row.
pub fn users_to_csv(users: &[User]) -> String {
    let mut out = String::from(USER_CSV_HEADER);
    out.push('\n');
    for u in users {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            u.id,
            csv_field(&u.email),
            csv_field(&u.full_name),
            u.trust_score,
            u.is_verified,
            u.is_suspended,
            u.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    out
}

impl Marketplace {
    fn moderation_page(&self, page: Option<i64>) -> Option<PageRequest> {
        Some(PageRequest::new(page, None, self.settings.admin_page_size))
    }

    fn log_page(&self, page: Option<i64>) -> Option<PageRequest> {
        Some(PageRequest::new(page, None, self.settings.log_page_size))
    }

    // Products

    pub async fn admin_products(&self, query: AdminProductQuery) -> Result<Page<ProductCard>> {
        let filter = ProductFilter {
            query: query.search,
            category_id: query.category_id,
            approved: query.approved,
            include_sold: true,
            page: self.moderation_page(query.page),
            ..Default::default()
        };
        self.storage.list_products(&filter).await
    }

    pub async fn admin_product_details(&self, admin: &User, id: Id) -> Result<ProductDetails> {
        self.product_details(Some(admin), id).await
    }

    pub async fn approve_product(&self, admin: &User, id: Id) -> Result<Product> {
        let mut product = self.product(id).await?;
        product.is_approved = true;
        product.approved_at = Some(Utc::now());
        self.storage.update_product(&product).await?;

        let link = format!("/admin/products/{}", id);
        self.storage.mark_notifications_read_by_link("New Product", &link).await?;
        self.hub.to_admins(HubPayload::AdminNotification {
            title: "Product Approved".into(),
            message: format!("{} was approved by {}", product.name, admin.full_name),
            link_url: Some(link),
        });
        self.hub.to_admins(HubPayload::ProductApproved { product_id: id });
        self.notify_quietly(
            product.owner_id,
            "Product Approved",
            &format!("Your product \"{}\" is now visible in the marketplace.", product.name),
            NotificationKind::Success,
            Some(&format!("/products/{}", id)),
        )
        .await;

        info!(product_id = id, admin_id = admin.id, "Product approved");
        self.log_activity(NewActivity::new("ApproveProduct", Some(admin.id)).entity("Product", id)).await;
        Ok(product)
    }

    pub async fn reject_product(&self, admin: &User, id: Id) -> Result<Product> {
        let mut product = self.product(id).await?;
        product.is_approved = false;
        product.approved_at = None;
        self.storage.update_product(&product).await?;
        self.notify_quietly(
            product.owner_id,
            "Product Not Approved",
            &format!("Your product \"{}\" was not approved.", product.name),
            NotificationKind::Warning,
            Some(&format!("/products/{}", id)),
        )
        .await;
        info!(product_id = id, admin_id = admin.id, "Product rejected");
        self.log_activity(NewActivity::new("RejectProduct", Some(admin.id)).entity("Product", id)).await;
        Ok(product)
    }

    pub async fn set_product_sold(&self, admin: &User, id: Id, sold: bool) -> Result<Product> {
        let mut product = self.product(id).await?;
        product.is_sold = sold;
        self.storage.update_product(&product).await?;
        let action = if sold { "MarkProductSold" } else { "MarkProductUnsold" };
        self.log_activity(NewActivity::new(action, Some(admin.id)).entity("Product", id)).await;
        Ok(product)
    }

    pub async fn toggle_featured(&self, admin: &User, id: Id) -> Result<Product> {
        let mut product = self.product(id).await?;
        product.is_featured = !product.is_featured;
        self.storage.update_product(&product).await?;
        self.log_activity(
            NewActivity::new("ToggleFeatured", Some(admin.id))
                .entity("Product", id)
                .details(format!("featured={}", product.is_featured)),
        )
        .await;
        Ok(product)
    }

    pub async fn admin_delete_product(&self, admin: &User, id: Id) -> Result<()> {
        self.product(id).await?;
        self.remove_product(id).await?;
        self.log_activity(NewActivity::new("AdminDeleteProduct", Some(admin.id)).entity("Product", id)).await;
        Ok(())
    }

    // Users

    pub async fn admin_users(&self, search: Option<String>, page: Option<i64>) -> Result<Page<User>> {
        self.storage
            .list_users(&SearchFilter { search, parent_id: None, page: self.moderation_page(page) })
            .await
    }

    pub async fn user(&self, id: Id) -> Result<User> {
        self.storage.get_user(id).await?.ok_or_else(|| BazaarError::not_found("user"))
    }

    pub async fn admin_user_details(&self, id: Id) -> Result<UserDetails> {
        let user = self.user(id).await?;
        let stats = self.storage.user_stats(id).await?;
        let products = self.my_products(&user, None).await?;
        Ok(UserDetails { user, stats, products })
    }

    fn not_self(admin: &User, target: Id, action: &str) -> Result<()> {
        if admin.id == target {
            return Err(BazaarError::invalid(format!("You cannot {} your own account", action)));
        }
        Ok(())
    }

    /// Suspends for `days` when given, otherwise until lifted.
    pub async fn suspend_user(&self, admin: &User, id: Id, days: Option<i64>) -> Result<User> {
        Self::not_self(admin, id, "suspend")?;
        let until = match days.filter(|d| *d > 0) {
            Some(d) if d > MAX_SUSPENSION_DAYS => {
                return Err(BazaarError::invalid(format!(
                    "Suspension cannot be longer than {} days",
                    MAX_SUSPENSION_DAYS
                )));
            }
            Some(d) => Some(
                Duration::try_days(d)
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .ok_or_else(|| BazaarError::invalid("Suspension length is out of range"))?,
            ),
            None => None,
        };
        self.storage.set_suspension(id, true, until).await?;
        info!(user_id = id, admin_id = admin.id, ?days, "User suspended");
        self.log_activity(NewActivity::new("SuspendUser", Some(admin.id)).entity("User", id)).await;
        self.user(id).await
    }

    pub async fn activate_user(&self, admin: &User, id: Id) -> Result<User> {
        self.storage.set_suspension(id, false, None).await?;
        info!(user_id = id, admin_id = admin.id, "User reactivated");
        self.log_activity(NewActivity::new("ActivateUser", Some(admin.id)).entity("User", id)).await;
        self.user(id).await
    }

    /// Blocks the user. Their sessions stay in place so the next request can
    /// tell them why they were signed out; `resolve_session` then revokes them.
    pub async fn block_user(&self, admin: &User, id: Id, reason: Option<&str>) -> Result<User> {
        Self::not_self(admin, id, "block")?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(super::accounts::DEFAULT_BLOCK_REASON);
        Validator::new().max_len("Reason", reason, 500).finish()?;
        let info = BlockInfo { reason: reason.to_string(), blocked_by: admin.id, blocked_at: Utc::now() };
        self.storage.set_block(id, Some(&info)).await?;
        warn!(user_id = id, admin_id = admin.id, reason, "User blocked");
        self.log_activity(
            NewActivity::new("BlockUser", Some(admin.id)).entity("User", id).details(reason),
        )
        .await;
        self.user(id).await
    }

    pub async fn unblock_user(&self, admin: &User, id: Id) -> Result<User> {
        self.storage.set_block(id, None).await?;
        info!(user_id = id, admin_id = admin.id, "User unblocked");
        self.log_activity(NewActivity::new("UnblockUser", Some(admin.id)).entity("User", id)).await;
        self.user(id).await
    }

    pub async fn set_trust_score(&self, admin: &User, id: Id, score: i32) -> Result<User> {
        let score = score.clamp(0, 100);
        self.storage.set_trust_score(id, score).await?;
        self.log_activity(
            NewActivity::new("UpdateTrustScore", Some(admin.id))
                .entity("User", id)
                .details(score.to_string()),
        )
        .await;
        self.user(id).await
    }

    pub async fn export_users_csv(&self) -> Result<String> {
        Ok(users_to_csv(&self.storage.all_users().await?))
    }

    // Reports

    pub async fn create_report(&self, reporter: &User, target: ReportTarget, target_id: Id, reason: &str) -> Result<Report> {
        let reason = reason.trim();
        Validator::new().required("Reason", reason).max_len("Reason", reason, 1000).finish()?;
        let exists = match target {
            ReportTarget::Product => self.storage.get_product(target_id).await?.is_some(),
            ReportTarget::User => self.storage.get_user(target_id).await?.is_some(),
            ReportTarget::Message => self.storage.get_message(target_id).await?.is_some(),
        };
        if !exists {
            return Err(BazaarError::not_found(target.as_str().to_lowercase()));
        }

        let report = self.storage.create_report(reporter.id, target, target_id, reason).await?;
        info!(report_id = report.id, target = %target, target_id, "Report filed");
        self.alert_admins(
            AdminAlert::new("New Report", format!("{} reported a {}: {}", reporter.full_name, target, reason))
                .kind(NotificationKind::Warning)
                .link(format!("/admin/reports/{}", report.id))
                .event(HubPayload::NewReport { report_id: report.id }),
        )
        .await;
        Ok(report)
    }

    pub async fn admin_reports(
        &self,
        resolved: Option<bool>,
        target_type: Option<ReportTarget>,
        page: Option<i64>,
    ) -> Result<Page<ReportView>> {
        self.storage
            .list_reports(&ReportFilter { resolved, target_type, page: self.moderation_page(page) })
            .await
    }

    pub async fn report(&self, id: Id) -> Result<Report> {
        self.storage.get_report(id).await?.ok_or_else(|| BazaarError::not_found("report"))
    }

    pub async fn resolve_report(&self, admin: &User, id: Id, resolution: &str) -> Result<Report> {
        let resolution = resolution.trim();
        Validator::new()
            .required("Resolution", resolution)
            .max_len("Resolution", resolution, 1000)
            .finish()?;
        self.report(id).await?;
        self.storage.resolve_report(id, resolution, Some(admin.id)).await?;
        self.log_activity(NewActivity::new("ResolveReport", Some(admin.id)).entity("Report", id)).await;
        self.report(id).await
    }

    /// The user a report is ultimately about.
    async fn reported_user(&self, report: &Report) -> Result<Id> {
        match report.target_type {
            ReportTarget::User => Ok(report.target_id),
            ReportTarget::Product => Ok(self.product(report.target_id).await?.owner_id),
            ReportTarget::Message => self
                .storage
                .get_message(report.target_id)
                .await?
                .map(|m| m.sender_id)
                .ok_or_else(|| BazaarError::not_found("message")),
        }
    }

    /// Suspends the reported user indefinitely and closes the report.
    pub async fn report_block_user(&self, admin: &User, id: Id) -> Result<Report> {
        let report = self.report(id).await?;
        let user_id = self.reported_user(&report).await?;
        Self::not_self(admin, user_id, "suspend")?;
        self.storage.set_suspension(user_id, true, None).await?;
        self.storage.resolve_report(id, BLOCKED_BY_REPORT, Some(admin.id)).await?;
        warn!(report_id = id, user_id, "User suspended from report");
        self.log_activity(NewActivity::new("ReportBlockUser", Some(admin.id)).entity("User", user_id)).await;
        self.report(id).await
    }

    pub async fn report_remove_product(&self, admin: &User, id: Id) -> Result<Report> {
        let report = self.report(id).await?;
        if report.target_type != ReportTarget::Product {
            return Err(BazaarError::invalid("This report is not about a product"));
        }
        self.remove_product(report.target_id).await?;
        self.storage.resolve_report(id, REMOVED_BY_REPORT, Some(admin.id)).await?;
        self.log_activity(
            NewActivity::new("ReportRemoveProduct", Some(admin.id)).entity("Product", report.target_id),
        )
        .await;
        self.report(id).await
    }

    // Verifications

    pub async fn admin_verifications(&self, approved: Option<bool>, page: Option<i64>) -> Result<Page<VerificationView>> {
        self.storage
            .list_verifications(&VerificationFilter { approved, page: self.moderation_page(page) })
            .await
    }

    pub async fn approve_verification(&self, admin: &User, id: Id) -> Result<()> {
        let verification = self
            .storage
            .get_verification(id)
            .await?
            .ok_or_else(|| BazaarError::not_found("verification"))?;
        self.storage.approve_verification(id, admin.id).await?;
        self.notify_quietly(
            verification.user_id,
            "Verification Approved",
            "Your student status has been verified.",
            NotificationKind::Success,
            None,
        )
        .await;
        self.log_activity(NewActivity::new("ApproveVerification", Some(admin.id)).entity("Verification", id)).await;
        Ok(())
    }

    pub async fn reject_verification(&self, admin: &User, id: Id, reason: &str) -> Result<()> {
        let reason = reason.trim();
        Validator::new().required("Reason", reason).max_len("Reason", reason, 500).finish()?;
        let verification = self
            .storage
            .get_verification(id)
            .await?
            .ok_or_else(|| BazaarError::not_found("verification"))?;
        self.storage.reject_verification(id, reason).await?;
        self.notify_quietly(
            verification.user_id,
            "Verification Rejected",
            &format!("Your verification request was rejected: {}", reason),
            NotificationKind::Warning,
            None,
        )
        .await;
        self.log_activity(NewActivity::new("RejectVerification", Some(admin.id)).entity("Verification", id)).await;
        Ok(())
    }

    // Chat monitoring

    pub async fn admin_messages(
        &self,
        product_id: Option<Id>,
        user_id: Option<Id>,
        search: Option<String>,
        page: Option<i64>,
    ) -> Result<Page<ChatMessageView>> {
        self.storage
            .search_messages(&ChatFilter { product_id, user_id, search, page: self.log_page(page) })
            .await
    }

    pub async fn admin_conversation(&self, a: Id, b: Id, product_id: Id) -> Result<Vec<ChatMessageView>> {
        self.storage.messages_between(a, b, product_id).await
    }

    pub async fn admin_delete_message(&self, admin: &User, id: Id) -> Result<()> {
        self.storage.get_message(id).await?.ok_or_else(|| BazaarError::not_found("message"))?;
        self.storage.delete_message(id).await?;
        self.log_activity(NewActivity::new("DeleteMessage", Some(admin.id)).entity("Message", id)).await;
        Ok(())
    }

    // Activity

    pub async fn admin_activity(&self, action: Option<String>, user_id: Option<Id>, page: Option<i64>) -> Result<Page<ActivityView>> {
        self.storage
            .list_activity(&ActivityFilter { action, user_id, page: self.log_page(page) })
            .await
    }

    async fn notify_quietly(&self, user_id: Id, title: &str, message: &str, kind: NotificationKind, link: Option<&str>) {
        if let Err(e) = self.notify(user_id, title, message, kind, link).await {
            warn!(error = %e, user_id, %title, "Failed to notify user");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::accounts::SessionLookup;
    use crate::services::test_support::*;
    use crate::services::RequestMeta;

    #[test]
    fn csv_quotes_awkward_fields() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("Doe, Jane"), "\"Doe, Jane\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn approval_clears_the_new_product_alert_and_notifies_owner() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let owner = student(&m, "o@uni.edu").await;
        let books = category(&m, "Books").await;
        let product = m
            .create_product(
                &owner,
                crate::services::catalog::ProductForm {
                    name: "Thermometer".into(),
                    category_id: Some(books.id),
                    price: Some(Money::from_cents(300)),
                    ..Default::default()
                },
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(m.storage.unread_notification_count(root.id).await.unwrap(), 1);

        let mut rx = m.hub.subscribe();
        let approved = m.approve_product(&root, product.id).await.unwrap();
        assert!(approved.is_approved);
        assert!(approved.approved_at.is_some());
        assert_eq!(m.storage.unread_notification_count(root.id).await.unwrap(), 0);
        assert_eq!(m.recent_notifications(owner.id).await.unwrap()[0].title, "Product Approved");

        assert!(matches!(rx.recv().await.unwrap().payload, HubPayload::AdminNotification { .. }));
        assert_eq!(rx.recv().await.unwrap().payload, HubPayload::ProductApproved { product_id: product.id });

        let rejected = m.reject_product(&root, product.id).await.unwrap();
        assert!(!rejected.is_approved);
        assert!(rejected.approved_at.is_none());
    }

    #[tokio::test]
    async fn featured_and_sold_flags_toggle() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let owner = student(&m, "o@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Globe", 800).await;

        assert!(m.toggle_featured(&root, product.id).await.unwrap().is_featured);
        assert!(!m.toggle_featured(&root, product.id).await.unwrap().is_featured);
        assert!(m.set_product_sold(&root, product.id, true).await.unwrap().is_sold);
        assert!(!m.set_product_sold(&root, product.id, false).await.unwrap().is_sold);

        let pending = m
            .admin_products(AdminProductQuery { approved: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(pending.total_count, 0);
    }

    #[tokio::test]
    async fn blocking_ends_sessions_and_unblocking_restores_access() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let user = student(&m, "u@uni.edu").await;
        let grant = m.login("u@uni.edu", "secret1", &RequestMeta::default()).await.unwrap();

        assert!(m.block_user(&root, root.id, None).await.is_err(), "cannot block yourself");
        let blocked = m.block_user(&root, user.id, Some("  ")).await.unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(blocked.block_reason.as_deref(), Some(crate::services::accounts::DEFAULT_BLOCK_REASON));
        assert_eq!(blocked.blocked_by, Some(root.id));
        match m.resolve_session(&grant.token).await.unwrap() {
            SessionLookup::Blocked { reason } => assert_eq!(reason, crate::services::accounts::DEFAULT_BLOCK_REASON),
            other => panic!("expected a blocked session, got {:?}", other),
        }
        assert!(matches!(m.resolve_session(&grant.token).await.unwrap(), SessionLookup::Missing));

        m.unblock_user(&root, user.id).await.unwrap();
        assert!(m.login("u@uni.edu", "secret1", &RequestMeta::default()).await.is_ok());
    }

    #[tokio::test]
    async fn suspension_and_trust_score() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let user = student(&m, "u@uni.edu").await;

        let suspended = m.suspend_user(&root, user.id, Some(7)).await.unwrap();
        assert!(suspended.is_suspended);
        assert!(suspended.suspended_until.unwrap() > Utc::now() + Duration::days(6));
        let active = m.activate_user(&root, user.id).await.unwrap();
        assert!(!active.is_suspended);
        assert!(active.suspended_until.is_none());

        let err = m.suspend_user(&root, user.id, Some(i64::MAX / 2)).await.unwrap_err();
        assert!(matches!(err, BazaarError::Validation(_)));
        assert!(!m.user(user.id).await.unwrap().is_suspended);

        assert_eq!(m.set_trust_score(&root, user.id, 250).await.unwrap().trust_score, 100);
        assert_eq!(m.set_trust_score(&root, user.id, -4).await.unwrap().trust_score, 0);
    }

    #[tokio::test]
    async fn reports_can_remove_products_or_suspend_users() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let owner = student(&m, "o@uni.edu").await;
        let reporter = student(&m, "r@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &owner, books.id, "Fake Watch", 999).await;

        assert!(m.create_report(&reporter, ReportTarget::Product, 404, "gone").await.is_err());
        let about_product = m.create_report(&reporter, ReportTarget::Product, product.id, "Counterfeit").await.unwrap();
        let about_user = m.create_report(&reporter, ReportTarget::User, owner.id, "Scammer").await.unwrap();
        assert_eq!(m.admin_reports(Some(false), None, None).await.unwrap().total_count, 2);

        let closed = m.report_remove_product(&root, about_product.id).await.unwrap();
        assert!(closed.resolved);
        assert_eq!(closed.resolution.as_deref(), Some(REMOVED_BY_REPORT));
        assert!(m.product(product.id).await.is_err());

        assert!(m.report_remove_product(&root, about_user.id).await.is_err());
        let closed = m.report_block_user(&root, about_user.id).await.unwrap();
        assert_eq!(closed.resolution.as_deref(), Some(BLOCKED_BY_REPORT));
        assert!(m.user(owner.id).await.unwrap().is_suspended);
        assert_eq!(m.admin_reports(Some(false), None, None).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn verification_decisions_notify_the_student() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let user = student(&m, "u@uni.edu").await;
        let first = m.request_verification(&user, "S-1", None).await.unwrap();

        assert!(m.reject_verification(&root, first.id, " ").await.is_err());
        m.reject_verification(&root, first.id, "Blurry photo").await.unwrap();
        assert_eq!(m.recent_notifications(user.id).await.unwrap()[0].title, "Verification Rejected");

        m.approve_verification(&root, first.id).await.unwrap();
        assert!(m.user(user.id).await.unwrap().is_verified);
    }

    #[tokio::test]
    async fn chat_monitoring_searches_and_removes_messages() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let seller = student(&m, "seller@uni.edu").await;
        let buyer = student(&m, "buyer@uni.edu").await;
        let books = category(&m, "Books").await;
        let (product, _) = for_sale(&m, &seller, books.id, "Tablet", 70000).await;
        m.send_message(&buyer, seller.id, product.id, "Can you do 600?").await.unwrap();
        let rude = m.send_message(&seller, buyer.id, product.id, "No way, spam spam").await.unwrap();

        let found = m.admin_messages(None, None, Some("spam".into()), None).await.unwrap();
        assert_eq!(found.total_count, 1);
        assert_eq!(found.page_size, 50);

        m.admin_delete_message(&root, rude.id).await.unwrap();
        assert_eq!(m.admin_conversation(buyer.id, seller.id, product.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn csv_export_lists_every_user() {
        let m = market();
        student(&m, "a@uni.edu").await;
        student(&m, "b@uni.edu").await;
        let csv = m.export_users_csv().await.unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], USER_CSV_HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("a@uni.edu"));
    }

    #[tokio::test]
    async fn activity_log_records_moderation() {
        let m = market();
        let root = admin(&m, "root@uni.edu").await;
        let user = student(&m, "u@uni.edu").await;
        m.suspend_user(&root, user.id, None).await.unwrap();
        let log = m.admin_activity(Some("Suspend".into()), None, None).await.unwrap();
        assert_eq!(log.total_count, 1);
        assert_eq!(log.items[0].log.entity_id, Some(user.id));
    }
}
