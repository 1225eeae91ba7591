use rust_decimal::Decimal;

/// A request whose gateway call failed, kept with its retry budget.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct FailedAttempt {
    pub id: i32,
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
    pub error: String,
    pub attempts: i32,
    pub created_at: chrono::NaiveDateTime,
}

impl FailedAttempt {
    pub fn is_exhausted(&self, max_attempts: i32) -> bool {
        self.attempts >= max_attempts
    }
}
