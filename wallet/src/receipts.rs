//! Payment notifications addressed to this wallet.
//!
//! Whatever transport delivers them (a relay subscription, a webhook, a
//! test harness) hands them to [`Wallet::listen_for_payments`] over an mpsc
//! channel. Nutzaps carry ecash and are redeemed; zaps were paid over
//! Lightning to somewhere else and are only recorded.
//!
//! [`Wallet::listen_for_payments`]: crate::wallet::Wallet::listen_for_payments

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::history::TransactionKind;

/// A payment someone made to this wallet's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentNotice {
    /// Ecash sent directly to us.
    Nutzap {
        event_id: String,
        sender: String,
        /// Encoded token bundle.
        token: String,
        #[serde(default)]
        comment: Option<String>,
    },
    /// A Lightning zap settled outside the ecash ledger.
    Zap {
        event_id: String,
        sender: String,
        amount: u64,
        #[serde(default)]
        comment: Option<String>,
    },
}

impl PaymentNotice {
    /// Id of the event that announced the payment. Used to drop redeliveries.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Nutzap { event_id, .. } | Self::Zap { event_id, .. } => event_id,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Self::Nutzap { sender, .. } | Self::Zap { sender, .. } => sender,
        }
    }

    /// Log entry kind this notice is recorded as.
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Nutzap { .. } => TransactionKind::NutzapReceived,
            Self::Zap { .. } => TransactionKind::ZapReceived,
        }
    }
}

/// A bounded notice channel.
pub fn channel(capacity: usize) -> (mpsc::Sender<PaymentNotice>, mpsc::Receiver<PaymentNotice>) {
    mpsc::channel(capacity)
}
