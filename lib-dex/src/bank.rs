//! Token Ledger
//!
//! The engine never owns balances. Every token movement goes through the
//! surrounding ledger's balance-transfer service, modelled here as the
//! [`TokenLedger`] trait.
//!
//! Inside a transaction transfers are recorded on a [`StagedLedger`]: it reads
//! through to the base ledger, applies pending debits and credits on top, and
//! refuses any transfer the base could not honour. Only after every check of
//! the transaction has passed are the recorded transfers replayed against the
//! base ledger, in order.

use std::collections::BTreeMap;

use lib_types::{Address, Amount, PoolId, TokenId};

use crate::errors::LedgerError;

/// Derive a keyless module account from a domain and seed
pub fn module_account(domain: &[u8], seed: &[u8]) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    hasher.update(seed);
    Address::new(*hasher.finalize().as_bytes())
}

/// Account holding a pool's reserves and accrued LP fees
pub fn pool_account(pool_id: &PoolId) -> Address {
    module_account(b"DEX_POOL_ACCOUNT_V1", pool_id.as_bytes())
}

/// Account escrowing commit-reveal deposits
pub fn commit_escrow_account() -> Address {
    module_account(b"DEX_COMMIT_ESCROW_V1", &[])
}

/// Balance-transfer service provided by the host ledger
pub trait TokenLedger {
    fn balance(&self, account: &Address, token: &TokenId) -> Amount;

    /// Move `amount` of `token`; must fail without side effects
    fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: Amount,
    ) -> Result<(), LedgerError>;
}

/// A recorded token movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub token: TokenId,
    pub amount: Amount,
}

/// In-memory ledger for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    balances: BTreeMap<(Address, TokenId), Amount>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit tokens out of thin air
    pub fn mint(&mut self, account: Address, token: TokenId, amount: Amount) {
        let entry = self.balances.entry((account, token)).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Sum of all balances of one token
    pub fn total_supply(&self, token: &TokenId) -> u128 {
        self.balances
            .iter()
            .filter(|((_, t), _)| t == token)
            .map(|(_, amount)| *amount as u128)
            .sum()
    }
}

impl TokenLedger for InMemoryLedger {
    fn balance(&self, account: &Address, token: &TokenId) -> Amount {
        self.balances.get(&(*account, *token)).copied().unwrap_or(0)
    }

    fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let have = self.balance(from, token);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                token: *token,
                have,
                need: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(to, token)
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow {
                account: *to,
                token: *token,
            })?;

        self.balances.insert((*from, *token), have - amount);
        self.balances.insert((*to, *token), credited);
        Ok(())
    }
}

/// Overlay recording the transfers of one transaction
pub struct StagedLedger<'a, L: TokenLedger> {
    base: &'a L,
    balances: BTreeMap<(Address, TokenId), Amount>,
    transfers: Vec<Transfer>,
}

impl<'a, L: TokenLedger> StagedLedger<'a, L> {
    pub fn new(base: &'a L) -> Self {
        Self {
            base,
            balances: BTreeMap::new(),
            transfers: Vec::new(),
        }
    }

    /// Balance including pending transfers
    pub fn balance(&self, account: &Address, token: &TokenId) -> Amount {
        self.balances
            .get(&(*account, *token))
            .copied()
            .unwrap_or_else(|| self.base.balance(account, token))
    }

    /// Record a transfer after checking it against the overlaid balance
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let have = self.balance(from, token);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                token: *token,
                have,
                need: amount,
            });
        }
        if from != to {
            let credited = self
                .balance(to, token)
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow {
                    account: *to,
                    token: *token,
                })?;
            self.balances.insert((*from, *token), have - amount);
            self.balances.insert((*to, *token), credited);
        }
        self.transfers.push(Transfer {
            from: *from,
            to: *to,
            token: *token,
            amount,
        });
        Ok(())
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn into_transfers(self) -> Vec<Transfer> {
        self.transfers
    }
}

/// Replay staged transfers against the base ledger, all or nothing.
/// A refused transfer reverses every transfer applied before it.
pub fn flush_transfers<L: TokenLedger>(
    ledger: &mut L,
    transfers: &[Transfer],
) -> Result<(), LedgerError> {
    for (applied, t) in transfers.iter().enumerate() {
        if let Err(e) = ledger.transfer(&t.from, &t.to, &t.token, t.amount) {
            revert_transfers(ledger, &transfers[..applied]);
            return Err(e);
        }
    }
    Ok(())
}

/// Undo applied transfers, newest first
pub fn revert_transfers<L: TokenLedger>(ledger: &mut L, applied: &[Transfer]) {
    for t in applied.iter().rev() {
        if let Err(e) = ledger.transfer(&t.to, &t.from, &t.token, t.amount) {
            tracing::error!(
                "Failed to reverse transfer of {} {} from {} to {}: {}",
                t.amount,
                t.token,
                t.from,
                t.to,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(id: u8) -> Address {
        Address::new([id; 32])
    }

    fn token(id: u8) -> TokenId {
        TokenId::new([id; 32])
    }

    #[test]
    fn test_in_memory_transfer() {
        let mut ledger = InMemoryLedger::new();
        ledger.mint(addr(1), token(1), 100);

        ledger.transfer(&addr(1), &addr(2), &token(1), 40).unwrap();
        assert_eq!(ledger.balance(&addr(1), &token(1)), 60);
        assert_eq!(ledger.balance(&addr(2), &token(1)), 40);
        assert_eq!(ledger.total_supply(&token(1)), 100);

        let err = ledger.transfer(&addr(2), &addr(1), &token(1), 41).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { have: 40, need: 41, .. }));
    }

    #[test]
    fn test_staged_reads_through_and_leaves_base_untouched() {
        let mut base = InMemoryLedger::new();
        base.mint(addr(1), token(1), 100);

        let transfers = {
            let mut staged = StagedLedger::new(&base);
            staged.transfer(&addr(1), &addr(2), &token(1), 70).unwrap();
            assert_eq!(staged.balance(&addr(1), &token(1)), 30);
            assert_eq!(staged.balance(&addr(2), &token(1)), 70);

            // Pending debits count against later transfers
            assert!(staged.transfer(&addr(1), &addr(3), &token(1), 31).is_err());
            staged.into_transfers()
        };

        assert_eq!(base.balance(&addr(1), &token(1)), 100);
        flush_transfers(&mut base, &transfers).unwrap();
        assert_eq!(base.balance(&addr(1), &token(1)), 30);
        assert_eq!(base.balance(&addr(2), &token(1)), 70);
    }

    #[test]
    fn test_staged_chained_transfers() {
        let mut base = InMemoryLedger::new();
        base.mint(addr(1), token(1), 10);

        let mut staged = StagedLedger::new(&base);
        staged.transfer(&addr(1), &addr(2), &token(1), 10).unwrap();
        // addr(2) may spend what it received earlier in the same transaction
        staged.transfer(&addr(2), &addr(3), &token(1), 10).unwrap();
        assert_eq!(staged.transfers().len(), 2);
        let transfers = staged.into_transfers();

        flush_transfers(&mut base, &transfers).unwrap();
        assert_eq!(base.balance(&addr(3), &token(1)), 10);
    }

    /// Ledger refusing the n-th transfer it sees
    struct RefusingLedger {
        inner: InMemoryLedger,
        refuse_at: usize,
        seen: usize,
    }

    impl TokenLedger for RefusingLedger {
        fn balance(&self, account: &Address, token: &TokenId) -> Amount {
            self.inner.balance(account, token)
        }

        fn transfer(&mut self, from: &Address, to: &Address, token: &TokenId, amount: Amount) -> Result<(), LedgerError> {
            self.seen += 1;
            if self.seen == self.refuse_at {
                return Err(LedgerError::BalanceOverflow { account: *to, token: *token });
            }
            self.inner.transfer(from, to, token, amount)
        }
    }

    #[test]
    fn test_refused_replay_reverses_applied_transfers() {
        let mut inner = InMemoryLedger::new();
        inner.mint(addr(1), token(1), 100);
        inner.mint(addr(2), token(2), 100);
        let mut ledger = RefusingLedger { inner, refuse_at: 3, seen: 0 };

        let transfers = vec![
            Transfer { from: addr(1), to: addr(3), token: token(1), amount: 60 },
            Transfer { from: addr(2), to: addr(1), token: token(2), amount: 25 },
            Transfer { from: addr(3), to: addr(2), token: token(1), amount: 10 },
        ];
        let err = flush_transfers(&mut ledger, &transfers).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { .. }));

        assert_eq!(ledger.balance(&addr(1), &token(1)), 100);
        assert_eq!(ledger.balance(&addr(3), &token(1)), 0);
        assert_eq!(ledger.balance(&addr(2), &token(2)), 100);
        assert_eq!(ledger.balance(&addr(1), &token(2)), 0);
    }

    #[test]
    fn test_module_accounts_are_distinct() {
        let pool_a = pool_account(&PoolId::new([1; 32]));
        let pool_b = pool_account(&PoolId::new([2; 32]));
        assert_ne!(pool_a, pool_b);
        assert_ne!(pool_a, commit_escrow_account());
    }
}
