//! Turning a cart (or a single listing) into an order.
//!
//! Cash on delivery and bank transfer create the order straight away with a
//! pending payment transaction. PayPal and Vodafone Cash first park the
//! checkout for the buyer; the order only exists once the simulated payment
//! page is confirmed.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::cart::CartView;
use super::notifications::AdminAlert;
use super::validation::{is_valid_email, is_valid_phone, Validator};
use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::hub::HubPayload;
use crate::metrics;

pub const CARD_UNAVAILABLE: &str = "Credit card payment is currently unavailable";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutForm {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub address: String,
    #[serde(default)]
    pub shipping_option: String,
    pub payment_method: String,
}

/// A checkout waiting for its payment page to be confirmed.
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub method: PaymentMethod,
    pub shipping: ShippingDetails,
    pub shipping_option: ShippingOption,
    pub shipping_fee: Money,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    Placed(Order),
    PaymentRequired(PendingPayment),
}

/// What the checkout page shows before the form is submitted.
#[derive(Debug, Clone)]
pub struct CheckoutSummary {
    pub cart: CartView,
    pub express_fee: Money,
}

/// "Card" is offered on the form but cannot be paid with.
pub fn parse_payment_method(value: &str) -> Result<PaymentMethod> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("card") || value.eq_ignore_ascii_case("creditcard") {
        return Err(BazaarError::PaymentUnavailable(CARD_UNAVAILABLE.to_string()));
    }
    if value.is_empty() {
        return Err(BazaarError::invalid("Payment method is required"));
    }
    Ok(PaymentMethod::from_str(value)?)
}

fn parse_shipping_option(value: &str) -> Result<ShippingOption> {
    if value.trim().is_empty() {
        return Ok(ShippingOption::Free);
    }
    Ok(ShippingOption::from_str(value.trim())?)
}

fn payment_reference() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TXN-{}", &id[..12])
}

impl CheckoutForm {
    fn shipping_details(&self) -> Result<ShippingDetails> {
        let details = ShippingDetails {
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self.email.trim().to_string(),
            country: self.country.trim().to_string(),
            state: self.state.trim().to_string(),
            city: self.city.trim().to_string(),
            address: self.address.trim().to_string(),
        };
        Validator::new()
            .required("Full name", &details.full_name)
            .max_len("Full name", &details.full_name, 100)
            .check(is_valid_phone(&details.phone), "Phone number is not valid")
            .check(is_valid_email(&details.email), "Email address is not valid")
            .required("Country", &details.country)
            .max_len("Country", &details.country, 100)
            .required("State", &details.state)
            .max_len("State", &details.state, 100)
            .required("City", &details.city)
            .max_len("City", &details.city, 100)
            .required("Address", &details.address)
            .max_len("Address", &details.address, 500)
            .finish()?;
        Ok(details)
    }
}

impl Marketplace {
    pub fn shipping_fee(&self, option: ShippingOption) -> Money {
        match option {
            ShippingOption::Free => Money::ZERO,
            ShippingOption::Express => self.settings.express_shipping_fee,
        }
    }

    pub async fn checkout_summary(&self, user: &User) -> Result<CheckoutSummary> {
        let cart = self.cart(user.id).await?;
        if cart.is_empty() {
            return Err(BazaarError::invalid("Your cart is empty"));
        }
        Ok(CheckoutSummary { cart, express_fee: self.settings.express_shipping_fee })
    }

    pub async fn checkout(&self, user: &User, form: CheckoutForm) -> Result<CheckoutOutcome> {
        let method = parse_payment_method(&form.payment_method)?;
        let shipping_option = parse_shipping_option(&form.shipping_option)?;
        let shipping = form.shipping_details()?;

        let cart = self.cart(user.id).await?;
        if cart.is_empty() {
            return Err(BazaarError::invalid("Your cart is empty"));
        }
        if let Some(line) = cart.lines.iter().find(|l| !l.is_purchasable()) {
            return Err(BazaarError::conflict(format!("{} is no longer available", line.product_name)));
        }

        let lines: Vec<OrderLine> = cart
            .lines
            .iter()
            .map(|l| OrderLine { listing_id: l.listing.id, quantity: l.item.quantity, cart_item_id: Some(l.item.id) })
            .collect();
        let shipping_fee = self.shipping_fee(shipping_option);

        if method.requires_payment_page() {
            let pending = PendingPayment {
                method,
                shipping,
                shipping_option,
                shipping_fee,
                lines,
                subtotal: cart.subtotal,
                total: cart.subtotal + shipping_fee,
                created_at: Utc::now(),
            };
            self.pending_payments()?.insert(user.id, pending.clone());
            info!(user_id = user.id, method = %method, "Checkout waiting for payment");
            return Ok(CheckoutOutcome::PaymentRequired(pending));
        }

        let order = self
            .finish_order(OrderDraft {
                buyer_id: user.id,
                lines,
                payment_method: method,
                shipping_fee,
                shipping,
                commission_bp: self.settings.commission_bp,
                transaction_status: TransactionStatus::Pending,
                transaction_reference: payment_reference(),
                transaction_notes: None,
            })
            .await?;
        Ok(CheckoutOutcome::Placed(order))
    }

    pub fn pending_payment(&self, user_id: Id) -> Result<Option<PendingPayment>> {
        Ok(self.pending_payments()?.get(&user_id).cloned())
    }

    pub fn cancel_pending_payment(&self, user_id: Id) -> Result<bool> {
        Ok(self.pending_payments()?.remove(&user_id).is_some())
    }

    /// Confirms the simulated payment page. Vodafone Cash needs the wallet number.
    pub async fn confirm_payment(&self, user: &User, wallet_phone: Option<&str>) -> Result<Order> {
        let pending = self
            .pending_payment(user.id)?
            .ok_or_else(|| BazaarError::not_found("pending payment"))?;

        let notes = match pending.method {
            PaymentMethod::VodafoneCash => {
                let phone = wallet_phone.map(str::trim).unwrap_or_default();
                if phone.is_empty() || !is_valid_phone(phone) {
                    return Err(BazaarError::invalid("A valid Vodafone Cash wallet number is required"));
                }
                Some(format!("Paid from Vodafone Cash wallet {}", phone))
            }
            method => Some(format!("Paid with {}", method.label())),
        };

        let order = self
            .finish_order(OrderDraft {
                buyer_id: user.id,
                lines: pending.lines.clone(),
                payment_method: pending.method,
                shipping_fee: pending.shipping_fee,
                shipping: pending.shipping.clone(),
                commission_bp: self.settings.commission_bp,
                transaction_status: TransactionStatus::Completed,
                transaction_reference: payment_reference(),
                transaction_notes: notes,
            })
            .await?;
        self.pending_payments()?.remove(&user.id);
        Ok(order)
    }

    /// Single-listing purchase, paid cash on delivery.
    pub async fn buy_now(&self, user: &User, listing_id: Id) -> Result<Order> {
        let listing = self.listing(listing_id).await?;
        if listing.seller_id == user.id {
            return Err(BazaarError::forbidden("you cannot buy your own listing"));
        }
        if listing.status != ListingStatus::Available {
            return Err(BazaarError::conflict("This listing is no longer available"));
        }
        self.finish_order(OrderDraft {
            buyer_id: user.id,
            lines: vec![OrderLine { listing_id, quantity: 1, cart_item_id: None }],
            payment_method: PaymentMethod::CashOnDelivery,
            shipping_fee: Money::ZERO,
            shipping: ShippingDetails {
                full_name: user.full_name.clone(),
                phone: user.phone_number.clone().unwrap_or_default(),
                email: user.email.clone(),
                address: user.address.clone().unwrap_or_default(),
                ..Default::default()
            },
            commission_bp: self.settings.commission_bp,
            transaction_status: TransactionStatus::Pending,
            transaction_reference: payment_reference(),
            transaction_notes: None,
        })
        .await
    }

    async fn finish_order(&self, draft: OrderDraft) -> Result<Order> {
        let order = self.storage.place_order(&draft).await?;
        metrics::order_placed(order.payment_method.as_str());
        info!(
            order_id = order.id,
            buyer_id = order.buyer_id,
            total = %order.total,
            payment = %order.payment_method,
            "Order placed"
        );
        self.log_activity(NewActivity::new("PlaceOrder", Some(order.buyer_id)).entity("Order", order.id)).await;
        self.alert_admins(
            AdminAlert::new("New Order", format!("Order #{} was placed for {}", order.id, order.total))
                .kind(NotificationKind::Success)
                .link(format!("/admin/orders/{}", order.id))
                .event(HubPayload::NewOrder { order_id: order.id }),
        )
        .await;
        Ok(order)
    }
}
