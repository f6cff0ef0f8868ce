use crate::error::StorageError;
use crate::events::TransferEvent;
use alloy::primitives::{Address, U256};
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
const MAX_LOCKED_ATTEMPTS: u32 = 6;

static LAST_LEDGER_NOW_MS: AtomicU64 = AtomicU64::new(1);

fn now_ms() -> u64 {
    let sample = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64);
    let mut prev = LAST_LEDGER_NOW_MS.load(Ordering::Relaxed);
    loop {
        let normalized = sample.unwrap_or(prev).max(prev).max(1);
        match LAST_LEDGER_NOW_MS.compare_exchange_weak(
            prev,
            normalized,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return normalized,
            Err(actual) => prev = actual,
        }
    }
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Addresses are keyed in the database as lowercase `0x`-prefixed hex so
/// lookups never depend on checksum casing.
fn addr_key(addr: Address) -> String {
    format!("{addr:#x}")
}

fn parse_balance(raw: &str) -> Result<U256, rusqlite::Error> {
    U256::from_str_radix(raw, 10).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

/// Durable (account, contract) -> balance store, plus per-contract scan
/// cursors. Every write runs inside a single IMMEDIATE transaction so a
/// crash or concurrent writer never observes a half-applied transfer.
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    path: PathBuf,
}

impl BalanceLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let ledger = Self {
            path: path.as_ref().to_path_buf(),
        };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    fn ensure_schema(&self) -> Result<(), StorageError> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;

                CREATE TABLE IF NOT EXISTS user_balances (
                    user_addr TEXT NOT NULL,
                    contract_addr TEXT NOT NULL,
                    balance TEXT NOT NULL,
                    updated_at_ms INTEGER NOT NULL,
                    PRIMARY KEY (user_addr, contract_addr)
                );
                CREATE INDEX IF NOT EXISTS idx_user_balances_user
                    ON user_balances(user_addr);

                CREATE TABLE IF NOT EXISTS scan_cursors (
                    contract_addr TEXT PRIMARY KEY NOT NULL,
                    next_block INTEGER NOT NULL,
                    updated_at_ms INTEGER NOT NULL
                );
                "#,
            )
        })
    }

    /// Open a short-lived connection and run `op`, retrying a bounded number
    /// of times when another writer holds the database lock.
    fn with_connection<T, F>(&self, context: &str, op: F) -> Result<T, StorageError>
    where
        F: Fn(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut last_err = String::new();
        for attempt in 1..=MAX_LOCKED_ATTEMPTS {
            let mut conn =
                Connection::open(&self.path).map_err(|e| StorageError::Open {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .map_err(|e| StorageError::Open {
                    path: self.path.display().to_string(),
                    reason: format!("failed to configure busy timeout: {e}"),
                })?;

            match op(&mut conn) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = err.to_string();
                    if is_sqlite_locked_error(&err) && attempt < MAX_LOCKED_ATTEMPTS {
                        continue;
                    }
                    return Err(StorageError::Operation {
                        context: context.to_string(),
                        path: self.path.display().to_string(),
                        reason: last_err,
                    });
                }
            }
        }

        Err(StorageError::Operation {
            context: context.to_string(),
            path: self.path.display().to_string(),
            reason: format!("still locked after {MAX_LOCKED_ATTEMPTS} attempt(s): {last_err}"),
        })
    }

    /// Apply one decoded transfer against `contract`'s balances.
    ///
    /// Sender and receiver rows are read, recomputed and upserted inside one
    /// transaction. Sender subtraction clamps at zero; the clamp discards the
    /// deficit, so it is logged loudly when it triggers. Receiver addition is
    /// checked so a would-be overflow fails the transaction instead of
    /// wrapping. Deliberately non-idempotent: applying the same event twice
    /// moves the balances twice.
    pub fn apply_transfer(
        &self,
        contract: Address,
        event: &TransferEvent,
    ) -> Result<(), StorageError> {
        let stamp = now_ms();
        self.with_connection("apply_transfer", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let sender_balance = read_balance(&tx, event.from, contract)?;
            let sender_next = if sender_balance < event.value {
                tracing::warn!(
                    "[LEDGER] Clamping sender {:#x} on contract {:#x} to zero (had {}, sent {})",
                    event.from,
                    contract,
                    sender_balance,
                    event.value
                );
                U256::ZERO
            } else {
                sender_balance - event.value
            };
            upsert_balance(&tx, event.from, contract, sender_next, stamp)?;

            let receiver_balance = read_balance(&tx, event.to, contract)?;
            let receiver_next = receiver_balance.checked_add(event.value).ok_or_else(|| {
                rusqlite::Error::IntegralValueOutOfRange(0, i64::MAX)
            })?;
            upsert_balance(&tx, event.to, contract, receiver_next, stamp)?;

            tx.commit()
        })
    }

    /// Balance for one (account, contract) pair; zero if never touched.
    pub fn balance_of(&self, account: Address, contract: Address) -> Result<U256, StorageError> {
        self.with_connection("balance_of", |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT balance FROM user_balances
                     WHERE user_addr = ?1 AND contract_addr = ?2",
                    params![addr_key(account), addr_key(contract)],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => parse_balance(&raw),
                None => Ok(U256::ZERO),
            }
        })
    }

    /// Every tracked (contract, balance) row for `account`.
    pub fn balances_for(&self, account: Address) -> Result<Vec<(Address, U256)>, StorageError> {
        self.with_connection("balances_for", |conn| {
            let mut stmt = conn.prepare(
                "SELECT contract_addr, balance FROM user_balances WHERE user_addr = ?1",
            )?;
            let rows = stmt.query_map(params![addr_key(account)], |row| {
                let contract_raw: String = row.get(0)?;
                let balance_raw: String = row.get(1)?;
                let contract = Address::from_str(&contract_raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok((contract, parse_balance(&balance_raw)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    /// Last persisted next-unscanned block for `contract`, if any.
    pub fn load_cursor(&self, contract: Address) -> Result<Option<u64>, StorageError> {
        self.with_connection("load_cursor", |conn| {
            let row: Option<i64> = conn
                .query_row(
                    "SELECT next_block FROM scan_cursors WHERE contract_addr = ?1",
                    params![addr_key(contract)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.map(|b| b as u64))
        })
    }

    /// Persist the next-unscanned block for `contract`. Called after each
    /// advanced batch; a restart resumes here instead of the configured
    /// start block.
    pub fn store_cursor(&self, contract: Address, next_block: u64) -> Result<(), StorageError> {
        let stamp = now_ms();
        self.with_connection("store_cursor", |conn| {
            conn.execute(
                "INSERT INTO scan_cursors (contract_addr, next_block, updated_at_ms)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(contract_addr) DO UPDATE SET
                     next_block = ?2, updated_at_ms = ?3",
                params![addr_key(contract), next_block as i64, stamp as i64],
            )?;
            Ok(())
        })
    }
}

fn read_balance(
    conn: &Connection,
    account: Address,
    contract: Address,
) -> rusqlite::Result<U256> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT balance FROM user_balances
             WHERE user_addr = ?1 AND contract_addr = ?2",
            params![addr_key(account), addr_key(contract)],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => parse_balance(&raw),
        None => Ok(U256::ZERO),
    }
}

fn upsert_balance(
    conn: &Connection,
    account: Address,
    contract: Address,
    balance: U256,
    stamp: u64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_balances (user_addr, contract_addr, balance, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_addr, contract_addr) DO UPDATE SET
             balance = ?3, updated_at_ms = ?4",
        params![
            addr_key(account),
            addr_key(contract),
            balance.to_string(),
            stamp as i64
        ],
    )?;
    Ok(())
}
