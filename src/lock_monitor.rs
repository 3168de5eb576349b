//! Lock monitor state machine
//!
//! Keeps this node's value time lock in the desired state across polls.
//! The current state is derived fresh from the lock store and the chain on
//! every pass, never cached. Lock intents are durably saved before their
//! transaction is broadcast, so a crash between the two is recovered by
//! rebroadcasting the exact saved transaction on the next pass.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Result, SidetreeError};
use crate::event::{EventSink, ServiceEvent};
use crate::lock_identifier::LockIdentifier;
use crate::lock_resolver::LockResolver;
use crate::rpc::BitcoinClient;
use crate::store::LockTransactionStore;
use crate::types::{BitcoinLockTransaction, SavedLockModel, SavedLockType, ValueTimeLockModel};
use crate::version::VersionRegistry;

/// Lock state derived from the lock store and the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    /// No lock exists, or the last lock was returned to the wallet.
    None,
    /// A lock transaction exists but is not yet confirmed and resolvable.
    Pending,
    /// A verified lock is active on chain.
    Confirmed(ValueTimeLockModel),
}

#[derive(Debug, Clone, Copy)]
pub struct LockMonitorConfig {
    /// Whether this node actively manages its value time lock. When false
    /// the monitor only refreshes state; it never creates, renews, or
    /// releases anything.
    pub lock_enabled: bool,
    /// Amount the node wants locked, in satoshis. Zero means any existing
    /// lock is released once spendable and no new one is created.
    pub desired_lock_amount_in_satoshis: u64,
    /// Satoshis reserved on top of the desired amount to cover the
    /// transaction fees of future relocks.
    pub transaction_fees_reserve_in_satoshis: u64,
}

/// Drives this node's value time lock toward the configured state.
pub struct LockMonitor {
    client: Arc<dyn BitcoinClient>,
    lock_store: Arc<dyn LockTransactionStore>,
    resolver: Arc<LockResolver>,
    versions: Arc<VersionRegistry>,
    config: LockMonitorConfig,
    event_sink: Arc<dyn EventSink>,
}

impl LockMonitor {
    pub fn new(
        client: Arc<dyn BitcoinClient>,
        lock_store: Arc<dyn LockTransactionStore>,
        resolver: Arc<LockResolver>,
        versions: Arc<VersionRegistry>,
        config: LockMonitorConfig,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            lock_store,
            resolver,
            versions,
            config,
            event_sink,
        }
    }

    /// One monitoring pass: derive the current state and move it one step
    /// toward the configured desired state.
    pub async fn handle_periodic_poll(&self) -> Result<()> {
        let state = self.resolve_current_state().await?;

        // A pending lock is rebroadcast and nothing else happens this cycle.
        if matches!(state, LockState::Pending) {
            return self.rebroadcast_saved_lock().await;
        }

        if !self.config.lock_enabled {
            debug!("lock management disabled, observing only");
            return Ok(());
        }

        if self.config.desired_lock_amount_in_satoshis > 0 {
            match state {
                LockState::None => self.create_first_lock().await,
                LockState::Confirmed(lock) => self.renew_or_release(&lock).await,
                LockState::Pending => Ok(()),
            }
        } else if let LockState::Confirmed(lock) = state {
            self.release_when_spendable(&lock).await
        } else {
            Ok(())
        }
    }

    /// The active verified lock, if any.
    ///
    /// Distinguishes "no lock" from "lock exists but is not usable yet" so
    /// callers can decide whether to wait.
    pub async fn get_active_value_time_lock(&self) -> Result<ValueTimeLockModel> {
        match self.resolve_current_state().await? {
            LockState::None => Err(SidetreeError::ValueTimeLockNotFound),
            LockState::Pending => Err(SidetreeError::ValueTimeLockInPendingState),
            LockState::Confirmed(lock) => Ok(lock),
        }
    }

    /// Derive the current lock state from the last saved intent and the chain.
    async fn resolve_current_state(&self) -> Result<LockState> {
        let Some(saved) = self.lock_store.get_last_lock().await? else {
            return Ok(LockState::None);
        };

        // A saved intent whose transaction the node has never seen means we
        // crashed between save and broadcast; the poll transition recovers
        // it by rebroadcasting the exact saved transaction.
        if self
            .client
            .get_raw_transaction(&saved.transaction_id)
            .await
            .is_err()
        {
            debug!(
                transaction_id = %saved.transaction_id,
                "saved lock transaction not on chain"
            );
            return Ok(LockState::Pending);
        }

        if saved.lock_type == SavedLockType::ReturnToWallet {
            return Ok(LockState::None);
        }

        let identifier = LockIdentifier {
            transaction_id: saved.transaction_id.clone(),
            redeem_script_as_hex: saved.redeem_script_as_hex.clone(),
        };
        match self.resolver.resolve(&identifier).await {
            Ok(lock) => Ok(LockState::Confirmed(lock)),
            // Not confirmed yet, or its block's fee data has not been
            // observed yet. Both clear up on their own.
            Err(SidetreeError::LockTransactionNotConfirmed(_))
            | Err(SidetreeError::BlockNotFound(_)) => Ok(LockState::Pending),
            Err(e) => Err(e),
        }
    }

    /// Send the last saved lock transaction out again, exactly as saved.
    /// Idempotent; the chain rejects a true double-spend harmlessly.
    async fn rebroadcast_saved_lock(&self) -> Result<()> {
        let Some(saved) = self.lock_store.get_last_lock().await? else {
            return Ok(());
        };
        info!(
            transaction_id = %saved.transaction_id,
            "rebroadcasting pending lock transaction"
        );
        self.client
            .broadcast_transaction(&saved.raw_transaction)
            .await?;
        self.event_sink.emit(ServiceEvent::LockRebroadcast {
            transaction_id: saved.transaction_id,
        });
        Ok(())
    }

    async fn create_first_lock(&self) -> Result<()> {
        let required = self.config.desired_lock_amount_in_satoshis
            + self.config.transaction_fees_reserve_in_satoshis;
        let available = self.client.get_balance_in_satoshis().await?;
        if available <= required {
            return Err(SidetreeError::NotEnoughBalanceForFirstLock {
                required,
                available,
            });
        }

        let current_height = self.client.get_current_block_height().await?;
        let duration = self.versions.lock_duration_at(current_height)?;
        let lock_transaction = self.client.create_lock_transaction(required, duration).await?;

        info!(amount = required, duration, "creating first value time lock");
        self.save_then_broadcast(lock_transaction, SavedLockType::Create)
            .await
    }

    /// A confirmed lock with a positive desired amount: renew it once
    /// spendable, or release it when the desired amount changed or the
    /// locked amount can no longer fund a relock.
    async fn renew_or_release(&self, lock: &ValueTimeLockModel) -> Result<()> {
        let current_height = self.client.get_current_block_height().await?;
        if current_height < lock.unlock_transaction_time {
            return Ok(());
        }

        let saved = self
            .lock_store
            .get_last_lock()
            .await?
            .ok_or(SidetreeError::ValueTimeLockNotFound)?;

        if saved.desired_lock_amount_in_satoshis != self.config.desired_lock_amount_in_satoshis {
            info!("desired lock amount changed, releasing existing lock");
            return self.release_lock(lock, &saved).await;
        }

        match self.renew_lock(lock, &saved, current_height).await {
            Err(SidetreeError::NotEnoughBalanceForRelock { required, available }) => {
                info!(
                    required,
                    available, "locked amount cannot fund relock, releasing"
                );
                self.release_lock(lock, &saved).await
            }
            other => other,
        }
    }

    async fn renew_lock(
        &self,
        lock: &ValueTimeLockModel,
        saved: &SavedLockModel,
        current_height: u64,
    ) -> Result<()> {
        let existing_duration = lock.unlock_transaction_time - lock.lock_transaction_time;
        let new_duration = self.versions.lock_duration_at(current_height)?;

        let relock_transaction = self
            .client
            .create_relock_transaction(&saved.transaction_id, existing_duration, new_duration)
            .await?;

        // The relock fee is paid out of the locked amount itself.
        let required =
            self.config.desired_lock_amount_in_satoshis + relock_transaction.transaction_fee;
        if lock.amount_locked < required {
            return Err(SidetreeError::NotEnoughBalanceForRelock {
                required,
                available: lock.amount_locked,
            });
        }

        info!(new_duration, "renewing value time lock");
        self.save_then_broadcast(relock_transaction, SavedLockType::Relock)
            .await
    }

    /// A confirmed lock with zero desired amount: release it as soon as
    /// the time lock allows spending.
    async fn release_when_spendable(&self, lock: &ValueTimeLockModel) -> Result<()> {
        let current_height = self.client.get_current_block_height().await?;
        if current_height < lock.unlock_transaction_time {
            debug!(
                unlock_height = lock.unlock_transaction_time,
                "lock not yet spendable, waiting to release"
            );
            return Ok(());
        }

        let saved = self
            .lock_store
            .get_last_lock()
            .await?
            .ok_or(SidetreeError::ValueTimeLockNotFound)?;
        self.release_lock(lock, &saved).await
    }

    async fn release_lock(&self, lock: &ValueTimeLockModel, saved: &SavedLockModel) -> Result<()> {
        let existing_duration = lock.unlock_transaction_time - lock.lock_transaction_time;
        let release_transaction = self
            .client
            .create_release_lock_transaction(&saved.transaction_id, existing_duration)
            .await?;

        info!("releasing value time lock back to wallet");
        self.save_then_broadcast(release_transaction, SavedLockType::ReturnToWallet)
            .await
    }

    /// Durably save the lock intent, then broadcast its transaction.
    /// The save must complete first; see the module docs.
    async fn save_then_broadcast(
        &self,
        transaction: BitcoinLockTransaction,
        lock_type: SavedLockType,
    ) -> Result<()> {
        let saved = SavedLockModel {
            lock_type,
            transaction_id: transaction.transaction_id.clone(),
            redeem_script_as_hex: transaction.redeem_script_as_hex.clone(),
            raw_transaction: transaction.serialized_transaction.clone(),
            desired_lock_amount_in_satoshis: self.config.desired_lock_amount_in_satoshis,
            create_timestamp: Utc::now().timestamp_millis(),
        };
        self.lock_store.add_lock(saved).await?;

        self.client
            .broadcast_transaction(&transaction.serialized_transaction)
            .await?;
        self.event_sink.emit(ServiceEvent::LockSaved { lock_type });
        Ok(())
    }
}
