use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::CollaboratorError;
use crate::types::{AccountAddress, SubLoanId};

/// marker for collaborator conformance checks at program opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorKind {
    CreditLine,
    LiquidityPool,
}

/// credit line collaborator, consulted around loan lifecycle transitions
///
/// hooks run synchronously inside the calling operation; a failing hook
/// aborts the whole call
pub trait CreditLine {
    /// conformance marker; must answer `CollaboratorKind::CreditLine`
    fn kind(&self) -> CollaboratorKind;

    fn on_before_loan_opened(
        &mut self,
        sub_loan_id: SubLoanId,
        borrower: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError>;

    fn on_after_loan_closed(
        &mut self,
        sub_loan_id: SubLoanId,
        borrower: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError>;
}

/// liquidity pool collaborator, notified before liquidity moves
pub trait LiquidityPool {
    /// conformance marker; must answer `CollaboratorKind::LiquidityPool`
    fn kind(&self) -> CollaboratorKind;

    /// token account liquidity is paid out of and returned to
    fn account(&self) -> &AccountAddress;

    fn on_before_liquidity_out(&mut self, amount: Money) -> Result<(), CollaboratorError>;

    fn on_before_liquidity_in(&mut self, amount: Money) -> Result<(), CollaboratorError>;
}

/// a single token transfer the market wants executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub amount: Money,
}

/// token movement port
///
/// `transfer_batch` must be all-or-nothing: the market stages its own state
/// commit behind it, so a partially executed batch would break atomicity
pub trait TokenGateway {
    fn transfer(
        &mut self,
        from: &AccountAddress,
        to: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError>;

    fn transfer_batch(&mut self, transfers: &[TransferIntent]) -> Result<(), CollaboratorError> {
        for t in transfers {
            self.transfer(&t.from, &t.to, t.amount)?;
        }
        Ok(())
    }
}

impl TokenGateway for Box<dyn TokenGateway> {
    fn transfer(
        &mut self,
        from: &AccountAddress,
        to: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError> {
        (**self).transfer(from, to, amount)
    }

    fn transfer_batch(&mut self, transfers: &[TransferIntent]) -> Result<(), CollaboratorError> {
        (**self).transfer_batch(transfers)
    }
}

#[derive(Error, Debug)]
pub enum TokenLedgerError {
    #[error("insufficient balance on {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: AccountAddress,
        available: Money,
        requested: Money,
    },
}

/// executed transfer record kept by the in-memory token ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: Uuid,
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub amount: Money,
}

/// in-memory token gateway for simulation and tests
///
/// balances must be minted before they can be spent; `transfer_batch`
/// validates every leg before executing any of them
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    balances: HashMap<AccountAddress, Money>,
    transfers: Vec<TransferRecord>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, account: &AccountAddress, amount: Money) {
        *self.balances.entry(account.clone()).or_insert(Money::ZERO) += amount;
    }

    pub fn balance(&self, account: &AccountAddress) -> Money {
        self.balances.get(account).copied().unwrap_or(Money::ZERO)
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    fn execute(&mut self, from: &AccountAddress, to: &AccountAddress, amount: Money) {
        *self.balances.entry(from.clone()).or_insert(Money::ZERO) -= amount;
        *self.balances.entry(to.clone()).or_insert(Money::ZERO) += amount;
        self.transfers.push(TransferRecord {
            transfer_id: Uuid::new_v4(),
            from: from.clone(),
            to: to.clone(),
            amount,
        });
    }

    fn check(&self, from: &AccountAddress, amount: Money) -> Result<(), TokenLedgerError> {
        let available = self.balance(from);
        if available < amount {
            return Err(TokenLedgerError::InsufficientBalance {
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        Ok(())
    }
}

impl TokenGateway for TokenLedger {
    fn transfer(
        &mut self,
        from: &AccountAddress,
        to: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError> {
        self.check(from, amount)?;
        self.execute(from, to, amount);
        Ok(())
    }

    fn transfer_batch(&mut self, transfers: &[TransferIntent]) -> Result<(), CollaboratorError> {
        // validate every leg against the running balances first
        let mut projected: HashMap<&AccountAddress, Money> = HashMap::new();
        for t in transfers {
            let from_balance = projected
                .get(&t.from)
                .copied()
                .unwrap_or_else(|| self.balance(&t.from));
            if from_balance < t.amount {
                return Err(TokenLedgerError::InsufficientBalance {
                    account: t.from.clone(),
                    available: from_balance,
                    requested: t.amount,
                }
                .into());
            }
            projected.insert(&t.from, from_balance - t.amount);
            let to_balance = projected
                .get(&t.to)
                .copied()
                .unwrap_or_else(|| self.balance(&t.to));
            projected.insert(&t.to, to_balance + t.amount);
        }
        for t in transfers {
            self.execute(&t.from, &t.to, t.amount);
        }
        Ok(())
    }
}

/// credit line with an optional per-borrower exposure cap
#[derive(Debug, Default)]
pub struct SimpleCreditLine {
    pub limit_per_borrower: Option<Money>,
    exposure: HashMap<AccountAddress, Money>,
}

#[derive(Error, Debug)]
pub enum CreditLineError {
    #[error("credit limit exceeded for {borrower}: limit {limit}, requested total {requested}")]
    LimitExceeded {
        borrower: AccountAddress,
        limit: Money,
        requested: Money,
    },
}

impl SimpleCreditLine {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Money) -> Self {
        Self {
            limit_per_borrower: Some(limit),
            exposure: HashMap::new(),
        }
    }

    pub fn exposure(&self, borrower: &AccountAddress) -> Money {
        self.exposure.get(borrower).copied().unwrap_or(Money::ZERO)
    }
}

impl CreditLine for SimpleCreditLine {
    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::CreditLine
    }

    fn on_before_loan_opened(
        &mut self,
        _sub_loan_id: SubLoanId,
        borrower: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError> {
        let next = self.exposure(borrower) + amount;
        if let Some(limit) = self.limit_per_borrower {
            if next > limit {
                return Err(CreditLineError::LimitExceeded {
                    borrower: borrower.clone(),
                    limit,
                    requested: next,
                }
                .into());
            }
        }
        self.exposure.insert(borrower.clone(), next);
        Ok(())
    }

    fn on_after_loan_closed(
        &mut self,
        _sub_loan_id: SubLoanId,
        borrower: &AccountAddress,
        amount: Money,
    ) -> Result<(), CollaboratorError> {
        let next = (self.exposure(borrower) - amount).max(Money::ZERO);
        self.exposure.insert(borrower.clone(), next);
        Ok(())
    }
}

/// liquidity pool backed by a single token account with a tracked headroom
#[derive(Debug)]
pub struct SimplePool {
    account: AccountAddress,
    pub available: Money,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("insufficient pool liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity { available: Money, requested: Money },
}

impl SimplePool {
    pub fn new(account: AccountAddress, available: Money) -> Self {
        Self { account, available }
    }
}

impl LiquidityPool for SimplePool {
    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::LiquidityPool
    }

    fn account(&self) -> &AccountAddress {
        &self.account
    }

    fn on_before_liquidity_out(&mut self, amount: Money) -> Result<(), CollaboratorError> {
        if self.available < amount {
            return Err(PoolError::InsufficientLiquidity {
                available: self.available,
                requested: amount,
            }
            .into());
        }
        self.available -= amount;
        Ok(())
    }

    fn on_before_liquidity_in(&mut self, amount: Money) -> Result<(), CollaboratorError> {
        self.available += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_ledger_transfer() {
        let mut tokens = TokenLedger::new();
        let alice = AccountAddress::new("alice");
        let bob = AccountAddress::new("bob");
        tokens.mint(&alice, Money::from_major(100));

        tokens.transfer(&alice, &bob, Money::from_major(40)).unwrap();

        assert_eq!(tokens.balance(&alice), Money::from_major(60));
        assert_eq!(tokens.balance(&bob), Money::from_major(40));
        assert_eq!(tokens.transfers().len(), 1);
    }

    #[test]
    fn test_token_ledger_rejects_overdraft() {
        let mut tokens = TokenLedger::new();
        let alice = AccountAddress::new("alice");
        let bob = AccountAddress::new("bob");
        tokens.mint(&alice, Money::from_major(10));

        assert!(tokens.transfer(&alice, &bob, Money::from_major(11)).is_err());
        assert_eq!(tokens.balance(&alice), Money::from_major(10));
    }

    #[test]
    fn test_transfer_batch_is_all_or_nothing() {
        let mut tokens = TokenLedger::new();
        let alice = AccountAddress::new("alice");
        let bob = AccountAddress::new("bob");
        tokens.mint(&alice, Money::from_major(10));

        let batch = vec![
            TransferIntent {
                from: alice.clone(),
                to: bob.clone(),
                amount: Money::from_major(8),
            },
            TransferIntent {
                from: alice.clone(),
                to: bob.clone(),
                amount: Money::from_major(8),
            },
        ];

        assert!(tokens.transfer_batch(&batch).is_err());
        // first leg must not have executed
        assert_eq!(tokens.balance(&alice), Money::from_major(10));
        assert!(tokens.transfers().is_empty());
    }

    #[test]
    fn test_transfer_batch_uses_incoming_funds() {
        let mut tokens = TokenLedger::new();
        let alice = AccountAddress::new("alice");
        let bob = AccountAddress::new("bob");
        tokens.mint(&alice, Money::from_major(10));

        // bob can forward money he receives earlier in the same batch
        let batch = vec![
            TransferIntent {
                from: alice.clone(),
                to: bob.clone(),
                amount: Money::from_major(10),
            },
            TransferIntent {
                from: bob.clone(),
                to: alice.clone(),
                amount: Money::from_major(4),
            },
        ];

        tokens.transfer_batch(&batch).unwrap();
        assert_eq!(tokens.balance(&alice), Money::from_major(4));
        assert_eq!(tokens.balance(&bob), Money::from_major(6));
    }

    #[test]
    fn test_credit_line_limit() {
        let borrower = AccountAddress::new("bob");
        let mut line = SimpleCreditLine::with_limit(Money::from_major(100));

        line.on_before_loan_opened(1, &borrower, Money::from_major(70))
            .unwrap();
        assert!(line
            .on_before_loan_opened(2, &borrower, Money::from_major(40))
            .is_err());
        line.on_after_loan_closed(1, &borrower, Money::from_major(70))
            .unwrap();
        assert!(line.exposure(&borrower).is_zero());
    }

    #[test]
    fn test_pool_headroom() {
        let mut pool = SimplePool::new(AccountAddress::new("pool"), Money::from_major(50));

        assert!(pool.on_before_liquidity_out(Money::from_major(60)).is_err());
        pool.on_before_liquidity_out(Money::from_major(30)).unwrap();
        pool.on_before_liquidity_in(Money::from_major(10)).unwrap();
        assert_eq!(pool.available, Money::from_major(30));
    }
}
