use crate::config::PoolTable;
use crate::error::PointsError;
use crate::storage::ledger::BalanceLedger;
use alloy::primitives::{Address, U512};

/// Aggregate an account's balances into a points total.
///
/// For each tracked (contract, balance) row, the matching pool multiplier is
/// applied; contracts absent from the pool table contribute nothing. The
/// running total is then scaled by the caller-supplied multiplier. All
/// arithmetic is widened to 512 bits and checked, so an overflow surfaces as
/// an error instead of wrapping.
pub fn compute_points(
    ledger: &BalanceLedger,
    pools: &PoolTable,
    account: Address,
    user_multiplier: u64,
) -> Result<U512, PointsError> {
    let balances = ledger.balances_for(account)?;
    if balances.is_empty() {
        return Err(PointsError::UnknownAccount(account));
    }

    let mut total = U512::ZERO;
    for (contract, balance) in balances {
        let Some(pool) = pools.get(&contract) else {
            continue;
        };
        let product: U512 = balance.widening_mul(pool.multiplier);
        total = total
            .checked_add(product)
            .ok_or(PointsError::Overflow(account))?;
    }

    total
        .checked_mul(U512::from(user_multiplier))
        .ok_or(PointsError::Overflow(account))
}
