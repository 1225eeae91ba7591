use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Offset of East Africa Time, the zone the provider validates timestamps in.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

/// Formats a provider timestamp (`YYYYMMDDHHmmss`) in East Africa Time.
pub fn provider_timestamp<Tz: TimeZone>(at: DateTime<Tz>) -> String {
    const FORMAT: &str = "%Y%m%d%H%M%S";
    match FixedOffset::east_opt(EAT_OFFSET_SECS) {
        Some(eat) => at.with_timezone(&eat).format(FORMAT).to_string(),
        None => at.with_timezone(&Utc).format(FORMAT).to_string(),
    }
}

/// `base64(shortcode + passkey + timestamp)`
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Whole currency units sent to the provider. Fractions are truncated.
pub fn whole_units(amount: Decimal) -> u64 {
    amount.trunc().to_u64().unwrap_or(0)
}
