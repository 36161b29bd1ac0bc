//! Order data model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::error::OrderError;

/// Order lifecycle status
///
/// `NEW -> PROCESSING -> {PROCESSED | INVALID}`. The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Statuses picked up by the reconciliation cycle
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Invalid | OrderStatus::Processed => 2,
        }
    }

    /// Resolve the status an order moves to when the oracle reports `next`.
    ///
    /// Transitions never go backwards: a terminal status is kept as is, and
    /// `PROCESSING` does not fall back to `NEW`.
    pub fn advance(self, next: OrderStatus) -> OrderStatus {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Externally supplied order number, validated with the Luhn checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse and validate an order number (digits only, Luhn checksum)
    pub fn parse(raw: &str) -> Result<Self, OrderError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderError::InvalidNumber(raw.to_string()));
        }
        if !luhn_valid(trimmed) {
            return Err(OrderError::InvalidNumber(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderNumber {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Luhn checksum over an ASCII digit string
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut d = (b - b'0') as u32;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

/// Persisted order record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub user_login: String,
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
    #[serde(rename = "uploaded_at")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_luhn_known_numbers() {
        assert!(luhn_valid("79927398713"));
        assert!(luhn_valid("12345678903"));
        assert!(luhn_valid("0"));
        assert!(!luhn_valid("79927398710"));
        assert!(!luhn_valid("12345678901"));
    }

    #[test]
    fn test_order_number_parse() {
        assert_eq!(
            OrderNumber::parse(" 79927398713\n").unwrap().as_str(),
            "79927398713"
        );
        assert!(matches!(
            OrderNumber::parse("7992739871a"),
            Err(OrderError::InvalidNumber(_))
        ));
        assert!(matches!(
            OrderNumber::parse(""),
            Err(OrderError::InvalidNumber(_))
        ));
        assert!(matches!(
            OrderNumber::parse("79927398710"),
            Err(OrderError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("REGISTERED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_advance_is_monotonic() {
        use OrderStatus::*;
        assert_eq!(New.advance(Processing), Processing);
        assert_eq!(New.advance(Processed), Processed);
        assert_eq!(Processing.advance(New), Processing);
        assert_eq!(Processing.advance(Invalid), Invalid);
        assert_eq!(Processed.advance(Invalid), Processed);
        assert_eq!(Invalid.advance(Processed), Invalid);
    }

    #[test]
    fn test_order_serializes_listing_shape() {
        let order = Order {
            id: 7,
            user_login: "ilya".to_string(),
            number: "79927398713".to_string(),
            status: OrderStatus::Processed,
            accrual: Some(dec!(200.21)),
            created_at: "2026-03-01T10:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["number"], "79927398713");
        assert_eq!(json["status"], "PROCESSED");
        assert_eq!(json["accrual"].as_f64(), Some(200.21));
        assert_eq!(json["uploaded_at"], "2026-03-01T10:00:00Z");
        assert!(json.get("user_login").is_none());

        let fresh = Order {
            accrual: None,
            status: OrderStatus::New,
            ..order
        };
        let json = serde_json::to_value(&fresh).unwrap();
        assert!(json.get("accrual").is_none());
    }
}
