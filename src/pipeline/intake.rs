//! Deposit Intake
//!
//! Opens a PENDING ticket against the active system wallet address for
//! the requested asset and tells the user where to send funds.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::PipelineError;
use crate::notify::Notifier;
use crate::storage::TicketStore;
use crate::types::{Asset, DepositTicket};

pub struct DepositIntake {
    store: Arc<dyn TicketStore>,
    notifier: Arc<dyn Notifier>,
}

impl DepositIntake {
    pub fn new(store: Arc<dyn TicketStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Open a new deposit ticket. Requires an active system wallet for
    /// the asset; the confirmation target is fixed here from the static
    /// per-asset table.
    pub async fn create_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        asset: Asset,
    ) -> Result<DepositTicket, PipelineError> {
        if amount <= Decimal::ZERO {
            return Err(PipelineError::InvalidAmount(amount));
        }

        let address = self
            .store
            .active_wallet(asset)
            .await?
            .ok_or(PipelineError::NoDepositAddress(asset))?;

        let ticket = DepositTicket::new(user_id.to_string(), asset, amount, address);
        self.store.insert(&ticket).await?;

        info!(
            target: "custodia::pipeline",
            ticket = %ticket.id,
            user = %user_id,
            asset = %asset,
            amount = %amount,
            "deposit ticket opened"
        );

        // Best-effort; intake has already committed
        self.notifier
            .notify(
                user_id,
                "Deposit address assigned",
                &format!(
                    "Send {} {} to {} and submit the transaction hash. Reference: {}",
                    amount, asset, ticket.wallet_address, ticket.id
                ),
            )
            .await;

        Ok(ticket)
    }
}
