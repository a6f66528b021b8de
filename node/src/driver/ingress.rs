//! Messages into the process driver.
//!
//! The driver exclusively owns the poset: sync sessions and the ingress
//! listener talk to it through this mailbox, so every admission happens on the
//! driver's task in a single total order.

use crate::poset::ComplianceError;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use lattice_types::{Status, Tip, Transaction, Unit};
use thiserror::Error;

/// Messages handled by the driver.
pub enum Message {
    /// Our id and tips, for the opening of a sync.
    Status {
        response: oneshot::Sender<Status>,
    },
    /// The units a peer with the given tips is missing.
    UnitsSince {
        tips: Vec<Tip>,
        response: oneshot::Sender<Vec<Unit>>,
    },
    /// Units received from a peer, in sender order. Responds with how many
    /// were admitted; a compliance failure drops the rest of the batch.
    Deliver {
        units: Vec<Unit>,
        response: oneshot::Sender<Result<usize, ComplianceError>>,
    },
    /// Verified transfers from the ingress listener.
    Submit {
        transactions: Vec<Transaction>,
    },
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("driver mailbox closed")]
    Closed,
    #[error("driver request canceled")]
    Canceled,
}

/// Mailbox for the driver.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &mut self,
        message: Message,
        receiver: oneshot::Receiver<T>,
    ) -> Result<T, MailboxError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| MailboxError::Closed)?;
        receiver.await.map_err(|_| MailboxError::Canceled)
    }

    pub async fn status(&mut self) -> Result<Status, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Status { response }, receiver).await
    }

    pub async fn units_since(&mut self, tips: Vec<Tip>) -> Result<Vec<Unit>, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::UnitsSince { tips, response }, receiver)
            .await
    }

    pub async fn deliver(
        &mut self,
        units: Vec<Unit>,
    ) -> Result<Result<usize, ComplianceError>, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Deliver { units, response }, receiver)
            .await
    }

    pub async fn submit(&mut self, transactions: Vec<Transaction>) -> Result<(), MailboxError> {
        self.sender
            .send(Message::Submit { transactions })
            .await
            .map_err(|_| MailboxError::Closed)
    }
}
