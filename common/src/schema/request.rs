use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::helpers::whole_units;

/// Longest `sender`/`recipient` the outcome tables can hold (`VARCHAR(255)`).
pub const MAX_PARTY_LEN: usize = 255;

/// Largest amount a `DECIMAL(10, 2)` column can hold.
pub fn max_amount() -> Decimal {
    Decimal::new(9_999_999_999, 2)
}

/// Checks a value against the column limits of the outcome tables.
pub fn check_party(field: &str, value: &str) -> Result<(), String> {
    let len = value.chars().count();
    if len > MAX_PARTY_LEN {
        return Err(format!(
            "{} is {} characters long, at most {} are stored",
            field, len, MAX_PARTY_LEN
        ));
    }
    Ok(())
}

/// Amounts are stored rounded to cents, so the rounded value must fit.
pub fn check_amount(amount: Decimal) -> Result<(), String> {
    if amount.round_dp(2) > max_amount() {
        return Err(format!(
            "amount {} exceeds the largest storable amount {}",
            amount,
            max_amount()
        ));
    }
    Ok(())
}

/// Payment request as it travels on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
}

impl TransactionRequest {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Checks the fields the gateway cannot be called without, and that the
    /// outcome can be stored whichever way the call goes.
    pub fn validate(&self) -> Result<(), String> {
        if self.sender.trim().is_empty() {
            return Err("sender must not be empty".to_string());
        }
        if self.recipient.trim().is_empty() {
            return Err("recipient must not be empty".to_string());
        }
        check_party("sender", &self.sender)?;
        check_party("recipient", &self.recipient)?;
        if self.amount <= Decimal::ZERO {
            return Err(format!("amount must be positive, got {}", self.amount));
        }
        check_amount(self.amount)?;
        if whole_units(self.amount) == 0 {
            return Err(format!(
                "amount {} is below one whole currency unit",
                self.amount
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> TransactionRequest {
        TransactionRequest {
            sender: "254712345678".to_string(),
            recipient: "merchant-001".to_string(),
            amount,
        }
    }

    #[test]
    fn decodes_float_amount_from_json() {
        let body = br#"{"sender":"254712345678","recipient":"merchant-001","amount":500.00}"#;
        let parsed = TransactionRequest::from_slice(body).unwrap();
        assert_eq!(parsed, request(dec!(500)));
    }

    #[test]
    fn rejects_undecodable_body() {
        assert!(TransactionRequest::from_slice(b"not json").is_err());
        assert!(TransactionRequest::from_slice(br#"{"sender":"a"}"#).is_err());
    }

    #[test]
    fn validation_rules() {
        assert!(request(dec!(500.00)).validate().is_ok());
        assert!(request(dec!(0)).validate().is_err());
        assert!(request(dec!(-10)).validate().is_err());
        assert!(request(dec!(0.50)).validate().is_err());

        let mut blank_sender = request(dec!(10));
        blank_sender.sender = "  ".to_string();
        assert!(blank_sender.validate().is_err());
    }

    #[test]
    fn values_that_do_not_fit_the_tables_are_rejected() {
        assert!(request(dec!(99999999.99)).validate().is_ok());
        assert!(request(dec!(99999999.995)).validate().is_err());

        let huge = request(dec!(1000000000)).validate().unwrap_err();
        assert!(huge.contains("exceeds"), "{}", huge);

        let mut long_sender = request(dec!(1000000000));
        long_sender.sender = "2".repeat(300);
        assert!(long_sender.validate().unwrap_err().contains("sender"));

        let mut long_recipient = request(dec!(10));
        long_recipient.recipient = "m".repeat(MAX_PARTY_LEN + 1);
        assert!(long_recipient.validate().is_err());
        long_recipient.recipient = "é".repeat(MAX_PARTY_LEN);
        assert!(long_recipient.validate().is_ok());
    }
}
