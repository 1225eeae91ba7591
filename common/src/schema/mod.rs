mod failed_attempt;
mod request;
mod transaction;

pub use failed_attempt::*;
pub use request::*;
pub use transaction::*;
