use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum stored as its variant name in the database and
/// on the wire. Parsing is case-insensitive.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case(stringify!($variant)) {
                        return Ok($name::$variant);
                    }
                )+
                Err(ParseEnumError { kind: stringify!($name), value: s.to_string() })
            }
        }
    };
}

text_enum!(
    /// Account role. Every registered account is a Student; admins are seeded.
    UserRole { Student, Admin }
);

text_enum!(ListingCondition { New, Excellent, Good, Fair, Poor });

text_enum!(ListingStatus { Available, Sold, Hidden, Reserved });

text_enum!(OrderStatus { Pending, Confirmed, Shipped, Delivered, Cancelled, Completed });

text_enum!(
    /// Payment methods an order can be settled with.
    PaymentMethod { CashOnDelivery, PayPal, VodafoneCash, BankTransfer }
);

text_enum!(TransactionStatus { Pending, Completed, Failed, Refunded });

text_enum!(NotificationKind { Info, Success, Warning, Error });

text_enum!(ReportTarget { Product, User, Message });

text_enum!(ShippingOption { Free, Express });

impl OrderStatus {
    /// Statuses reachable from `self` through the admin back office.
    pub fn next_statuses(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Shipped, Cancelled],
            Shipped => &[Delivered, Cancelled],
            Delivered => &[Completed],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.next_statuses().is_empty()
    }

    /// Reaching this status means the goods changed hands.
    pub fn marks_items_sold(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Completed)
    }

    /// Message sent to the buyer when the order enters this status.
    pub fn buyer_message(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Your order is pending confirmation.",
            OrderStatus::Confirmed => "Your order has been confirmed and is being prepared.",
            OrderStatus::Shipped => "Your order has been shipped.",
            OrderStatus::Delivered => "Your order has been delivered. You can now rate the product.",
            OrderStatus::Cancelled => "Your order has been cancelled.",
            OrderStatus::Completed => "Your order is complete. Thank you for shopping with us.",
        }
    }
}

impl PaymentMethod {
    /// Methods confirmed on a simulated payment page before the order exists.
    pub fn requires_payment_page(self) -> bool {
        matches!(self, PaymentMethod::PayPal | PaymentMethod::VodafoneCash)
    }

    pub fn label(self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "Cash on delivery",
            PaymentMethod::PayPal => "PayPal",
            PaymentMethod::VodafoneCash => "Vodafone Cash",
            PaymentMethod::BankTransfer => "Bank transfer",
        }
    }
}

impl ShippingOption {
    pub fn label(self) -> &'static str {
        match self {
            ShippingOption::Free => "Free shipping",
            ShippingOption::Express => "Express shipping",
        }
    }
}
