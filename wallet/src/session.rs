//! # Wallet Session
//!
//! The explicit owner of one [`Wallet`]. Whoever logs a user in opens a
//! session and passes `session.wallet()` down by reference; there is no
//! process-wide wallet. Two sessions, even for the same owner over
//! different stores, never share state.

use std::sync::Arc;

use tracing::info;

use crate::config::WalletConfig;
use crate::error::WalletResult;
use crate::mint::MintClient;
use crate::store::WalletStore;
use crate::wallet::{Wallet, WalletStatus};

/// One logged-in wallet.
#[derive(Debug)]
pub struct WalletSession {
    wallet: Wallet,
}

impl WalletSession {
    /// Builds a wallet for `owner` and loads it.
    ///
    /// On a load failure the error is returned and nothing keeps running.
    pub async fn open(
        owner: impl Into<String>,
        config: WalletConfig,
        client: Arc<dyn MintClient>,
        store: Arc<dyn WalletStore>,
    ) -> WalletResult<Self> {
        let wallet = Wallet::new(owner, config, client, store);
        wallet.load().await?;
        info!(owner = wallet.owner(), "session opened");
        Ok(Self { wallet })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn owner(&self) -> &str {
        self.wallet.owner()
    }

    pub fn is_active(&self) -> bool {
        self.wallet.status() == WalletStatus::Ready
    }

    /// Stops every monitor and payment listener and ends the session.
    pub async fn logout(self) {
        let owner = self.wallet.owner().to_string();
        self.wallet.shutdown().await;
        info!(owner = %owner, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TokenBundle;
    use crate::mint::DevMint;
    use crate::store::MemoryStore;
    use crate::token::MintUrl;

    fn config() -> WalletConfig {
        WalletConfig {
            default_mints: vec!["https://mint.example".into()],
            ..WalletConfig::default()
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let dev = Arc::new(DevMint::new());
        let mint = MintUrl::parse("https://mint.example").unwrap();

        let alice = WalletSession::open("alice", config(), dev.clone(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let bob = WalletSession::open("bob", config(), dev.clone(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();

        let bundle = TokenBundle::single(mint.clone(), dev.issue(&mint, 40), None).encode();
        alice.wallet().receive_ecash(&bundle).await.unwrap();

        assert_eq!(alice.wallet().balance(), 40);
        assert_eq!(bob.wallet().balance(), 0);
        assert!(bob.wallet().transactions(10).is_empty());
    }

    #[tokio::test]
    async fn logout_stops_monitors() {
        let dev = Arc::new(DevMint::new());
        let session = WalletSession::open("carol", config(), dev, Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let wallet = session.wallet().clone();
        wallet.generate_invoice(10, "").await.unwrap();
        assert_eq!(wallet.active_monitors(), 1);
        assert!(session.is_active());

        session.logout().await;
        assert_eq!(wallet.active_monitors(), 0);
        assert_eq!(wallet.status(), WalletStatus::Uninitialized);
    }

    #[tokio::test]
    async fn reopening_restores_pending_invoices() {
        let dev = Arc::new(DevMint::new());
        let store = Arc::new(MemoryStore::new());

        let first = WalletSession::open("dave", config(), dev.clone(), store.clone())
            .await
            .unwrap();
        let invoice = first.wallet().generate_invoice(25, "later").await.unwrap();
        first.logout().await;

        let second = WalletSession::open("dave", config(), dev.clone(), store)
            .await
            .unwrap();
        let pending = second.wallet().pending_invoices();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].quote_id, invoice.quote_id);
        assert_eq!(second.wallet().active_monitors(), 1);
        second.logout().await;
    }
}
