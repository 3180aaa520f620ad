//! Multi-step namespace mutations with compensating rollback.
//!
//! A [`Transaction`] is an ordered list of `(apply, compensate)` steps. When an
//! apply step fails, every registered compensation runs in reverse
//! registration order, including those whose apply never ran. Compensations
//! must therefore be written as "ensure this effect is absent" and be safe to
//! run at any time.

use crate::error::{FsError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

type Apply = Box<dyn FnOnce() -> Result<()> + Send>;
type Compensate = Box<dyn FnOnce() -> Result<()> + Send>;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Transaction {
    id: u64,
    applies: Vec<Apply>,
    compensations: Vec<Compensate>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            applies: Vec::new(),
            compensations: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.applies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applies.is_empty()
    }

    pub fn add_step<A, C>(&mut self, apply: A, compensate: C)
    where
        A: FnOnce() -> Result<()> + Send + 'static,
        C: FnOnce() -> Result<()> + Send + 'static,
    {
        self.applies.push(Box::new(apply));
        self.compensations.push(Box::new(compensate));
    }

    /// Runs every apply step in order. On the first failure all compensations
    /// run and the original error is returned.
    pub fn execute(self) -> Result<()> {
        let Transaction {
            id,
            applies,
            compensations,
        } = self;

        tracing::debug!("starting transaction {id} with {} steps", applies.len());
        for (step, apply) in applies.into_iter().enumerate() {
            if let Err(e) = apply() {
                tracing::warn!("transaction {id} failed at step {step}: {e}; rolling back");
                for compensate in compensations.into_iter().rev() {
                    if let Err(rollback_err) = compensate() {
                        tracing::error!("rollback step of transaction {id} failed: {rollback_err}");
                    }
                }
                return Err(e);
            }
        }
        tracing::debug!("transaction {id} completed");
        Ok(())
    }
}

/// Executes transactions and turns failures into [`FsError::TransactionFailure`].
#[derive(Default)]
pub struct TransactionManager {
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(&self, txn: Transaction) -> Result<()> {
        let id = txn.id();
        match txn.execute() {
            Ok(()) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                tracing::error!("transaction {id} failed and was rolled back: {e}");
                Err(FsError::TransactionFailure {
                    id,
                    source: Box::new(e),
                })
            }
        }
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }
}
