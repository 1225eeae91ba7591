mod db;
mod error;
mod helpers;
mod queue;
mod schema;
mod store;

pub mod mpesa;

pub use db::*;
pub use error::*;
pub use helpers::*;
pub use queue::*;
pub use mpesa::{Environment, MpesaClient, MpesaConfig, PaymentGateway, StkPushResponse};
pub use schema::*;
pub use store::*;
