use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use common::{GatewayError, PaymentGateway, StkPushResponse};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub enum Reply {
    Accept(&'static str),
    Timeout,
    Reject(&'static str),
}

/// Gateway that answers from a script. An exhausted script times out.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(String, Decimal)>>,
}

impl ScriptedGateway {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Decimal)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate(
        &self,
        payer: &str,
        amount: Decimal,
    ) -> Result<StkPushResponse, GatewayError> {
        self.calls.lock().unwrap().push((payer.to_string(), amount));
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Timeout);
        match reply {
            Reply::Accept(checkout_request_id) => Ok(StkPushResponse {
                merchant_request_id: "29115-34620561-1".to_string(),
                checkout_request_id: checkout_request_id.to_string(),
                response_code: "0".to_string(),
                response_description: "Success. Request accepted for processing".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            }),
            Reply::Timeout => Err(GatewayError::Rejected {
                code: "504".to_string(),
                description: "operation timed out".to_string(),
            }),
            Reply::Reject(code) => Err(GatewayError::Rejected {
                code: code.to_string(),
                description: "Rejected".to_string(),
            }),
        }
    }
}
