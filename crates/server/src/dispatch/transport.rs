//! The outbound mail seam.
//!
//! The pipeline only needs "send one rendered message"; everything else
//! about SMTP stays behind this trait. Tests substitute an in-memory
//! transport.

use std::future::Future;
use std::pin::Pin;

use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::TransportError;

/// Transport acknowledgement for a single message.
#[derive(Clone, Debug, Default)]
pub struct SendReceipt {
    /// Transport-assigned id, when the transport reports one.
    pub message_id: Option<String>,
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<SendReceipt, TransportError>> + Send + 'a>>;

pub trait MailTransport: Send + Sync {
    fn send_message(&self, message: Message) -> SendFuture<'_>;
}

impl MailTransport for AsyncSmtpTransport<Tokio1Executor> {
    fn send_message(&self, message: Message) -> SendFuture<'_> {
        Box::pin(async move {
            match self.send(message).await {
                Ok(response) => Ok(SendReceipt {
                    message_id: response.message().next().map(str::to_string),
                }),
                Err(e) => Err(TransportError::Rejected(e.to_string())),
            }
        })
    }
}
