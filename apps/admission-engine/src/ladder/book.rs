//! Per-account ladders with checkpointing.
//!
//! Each account owns one [`RiskLadder`] behind its own async mutex, so
//! updates for one account are serialized while different accounts
//! proceed in parallel. A ladder is restored from the [`LadderStore`] on
//! first touch and checkpointed after every update. An update is applied
//! to a copy and only becomes visible once its checkpoint is saved.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::observability::record_ladder_index;

use super::config::{LadderConfigError, RiskLadderConfig};
use super::notch::{LadderError, MovementResult, RiskLadder};
use super::store::{LadderStore, StoreError};

/// Ladder book failures.
#[derive(Debug, Error)]
pub enum BookError {
    /// Day rejected by the ladder.
    #[error(transparent)]
    Ladder(#[from] LadderError),

    /// Checkpoint could not be loaded or saved.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ladder configuration rejected.
    #[error(transparent)]
    Config(#[from] LadderConfigError),
}

/// Keyed collection of account ladders.
pub struct LadderBook {
    config: RiskLadderConfig,
    store: Arc<dyn LadderStore>,
    ladders: RwLock<HashMap<String, Arc<Mutex<RiskLadder>>>>,
}

impl std::fmt::Debug for LadderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LadderBook")
            .field("accounts", &self.accounts())
            .finish_non_exhaustive()
    }
}

impl LadderBook {
    /// Create a book. The config is validated once here.
    pub fn new(
        config: RiskLadderConfig,
        store: Arc<dyn LadderStore>,
    ) -> Result<Self, LadderConfigError> {
        Ok(Self {
            config: config.validated()?,
            store,
            ladders: RwLock::new(HashMap::new()),
        })
    }

    /// Shared ladder configuration.
    #[must_use]
    pub const fn config(&self) -> &RiskLadderConfig {
        &self.config
    }

    /// Accounts currently loaded.
    #[must_use]
    pub fn accounts(&self) -> Vec<String> {
        let ladders = self
            .ladders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut accounts: Vec<String> = ladders.keys().cloned().collect();
        drop(ladders);
        accounts.sort();
        accounts
    }

    /// Apply one trading day to an account's ladder and checkpoint it.
    pub async fn process_daily_pnl(
        &self,
        account_id: &str,
        pnl: Decimal,
        date: NaiveDate,
        win_rate: Option<f64>,
    ) -> Result<MovementResult, BookError> {
        let ladder = self.ladder(account_id).await?;
        let mut ladder = ladder.lock().await;

        let mut next = ladder.clone();
        let result = next.process_daily_pnl(pnl, date, win_rate)?;
        self.persist(account_id, &next).await?;
        *ladder = next;
        drop(ladder);

        Ok(result)
    }

    /// Force an account's ladder to `index` and checkpoint it.
    pub async fn reset_to_notch(
        &self,
        account_id: &str,
        index: usize,
        reason: &str,
    ) -> Result<MovementResult, BookError> {
        let ladder = self.ladder(account_id).await?;
        let mut ladder = ladder.lock().await;

        let mut next = ladder.clone();
        let result = next.reset_to_notch(index, reason);
        self.persist(account_id, &next).await?;
        *ladder = next;
        drop(ladder);

        Ok(result)
    }

    /// Current risk limit for an account.
    pub async fn current_limit(&self, account_id: &str) -> Result<Decimal, BookError> {
        let ladder = self.ladder(account_id).await?;
        let limit = ladder.lock().await.current_limit();
        Ok(limit)
    }

    /// Current notch index for an account.
    pub async fn current_index(&self, account_id: &str) -> Result<usize, BookError> {
        let ladder = self.ladder(account_id).await?;
        let index = ladder.lock().await.current_index();
        Ok(index)
    }

    /// The account's ladder, restoring or creating it on first access.
    pub async fn ladder(&self, account_id: &str) -> Result<Arc<Mutex<RiskLadder>>, BookError> {
        if let Some(existing) = self.loaded(account_id) {
            return Ok(existing);
        }

        // The store is read without holding the map lock.
        let ladder = match self.store.load(account_id).await? {
            Some(checkpoint) => {
                let ladder = RiskLadder::restore(self.config.clone(), &checkpoint)?;
                tracing::info!(
                    account_id,
                    index = ladder.current_index(),
                    last_processed = ?checkpoint.last_processed_date,
                    "Ladder restored from checkpoint"
                );
                ladder
            }
            None => {
                let ladder = RiskLadder::new(self.config.clone())?;
                tracing::info!(
                    account_id,
                    index = ladder.current_index(),
                    "Ladder started at default notch"
                );
                ladder
            }
        };
        record_ladder_index(account_id, ladder.current_index());

        let mut ladders = self
            .ladders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = ladders
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ladder)))
            .clone();
        drop(ladders);

        Ok(entry)
    }

    fn loaded(&self, account_id: &str) -> Option<Arc<Mutex<RiskLadder>>> {
        self.ladders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(account_id)
            .cloned()
    }

    async fn persist(&self, account_id: &str, ladder: &RiskLadder) -> Result<(), BookError> {
        if let Err(e) = self.store.save(&ladder.checkpoint(account_id)).await {
            tracing::error!(account_id, error = %e, "Failed to checkpoint ladder; update discarded");
            return Err(e.into());
        }
        record_ladder_index(account_id, ladder.current_index());
        Ok(())
    }
}
