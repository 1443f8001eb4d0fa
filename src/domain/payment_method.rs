//! Card details carried from checkout to the Payment service.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Card brand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    Visa,
    MasterCard,
    Amex,
}

/// A card the buyer chose at checkout.
///
/// `Debug` masks everything but the last four digits so the struct can be
/// logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub card_number: String,
    pub card_holder_name: String,
    pub expiration_month: u32,
    pub expiration_year: i32,
    pub security_code: String,
    pub card_type: CardType,
}

impl PaymentMethod {
    /// Last four digits of the card number.
    pub fn last_four(&self) -> &str {
        let len = self.card_number.len();
        &self.card_number[len.saturating_sub(4)..]
    }

    /// `**** 4242` style rendering.
    pub fn masked(&self) -> String {
        format!("**** {}", self.last_four())
    }

    /// Cards are valid through the last day of their expiration month.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        (self.expiration_year, self.expiration_month) < (now.year(), now.month())
    }

    /// Digits only, 12 to 19 of them.
    pub fn has_well_formed_number(&self) -> bool {
        let len = self.card_number.len();
        (12..=19).contains(&len) && self.card_number.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Debug for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentMethod")
            .field("card_number", &self.masked())
            .field("card_holder_name", &self.card_holder_name)
            .field("expiration_month", &self.expiration_month)
            .field("expiration_year", &self.expiration_year)
            .field("card_type", &self.card_type)
            .finish_non_exhaustive()
    }
}
