// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Read access to the C-chain indexer database, exposed to the calculation as a [Ledger].

use std::{future::Future, sync::Arc};

use alloy_primitives::{Address, Bytes, FixedBytes, B256};
use async_trait::async_trait;
use ftso_rewards::ledger::{BlockAssuranceResult, Ledger, LedgerResponse, LogRecord, TransactionRecord};
use sqlx::{any::AnyPoolOptions, AnyPool, Row};

use super::DbError;

pub type LedgerDbObj = Arc<LedgerDb>;

/// `states` row holding the oldest indexed block.
pub const FIRST_DATABASE_BLOCK: &str = "first_database_block";
/// `states` row holding the newest indexed block.
pub const LAST_DATABASE_BLOCK: &str = "last_database_block";

// Batch insert chunk size to stay below the SQLite parameter limit.
const BATCH_INSERT_CHUNK_SIZE: usize = 75;

/// Timestamps of the oldest and newest indexed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedRange {
    pub first_timestamp: u64,
    pub last_timestamp: u64,
}

impl IndexedRange {
    /// Availability of `[start, end]`. An uncovered end is acceptable as `TIMEOUT_OK` once `now`
    /// is past `end + end_timeout`.
    pub fn assurance(&self, start: u64, end: u64, end_timeout: Option<u64>, now: u64) -> BlockAssuranceResult {
        if self.first_timestamp > start {
            return BlockAssuranceResult::NotOk;
        }
        if self.last_timestamp >= end {
            return BlockAssuranceResult::Ok;
        }
        match end_timeout {
            Some(timeout) if now > end.saturating_add(timeout) => BlockAssuranceResult::TimeoutOk,
            _ => BlockAssuranceResult::NotOk,
        }
    }
}

#[async_trait]
pub trait LedgerIndexerDb {
    async fn insert_transactions(&self, transactions: &[TransactionRecord]) -> Result<(), DbError>;

    async fn insert_logs(&self, logs: &[LogRecord]) -> Result<(), DbError>;

    async fn set_state(&self, name: &str, block_number: u64, block_timestamp: u64) -> Result<(), DbError>;

    /// `None` until both bounds of the indexed history are recorded.
    async fn indexed_range(&self) -> Result<Option<IndexedRange>, DbError>;

    /// Transactions to `to` with the given selector in `[start, end]`, in chain order.
    async fn transactions(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
    ) -> Result<Vec<TransactionRecord>, DbError>;

    /// Logs of `address` with the given first topic in `[start, end]`, in chain order.
    async fn logs(&self, address: Address, topic0: B256, start: u64, end: u64) -> Result<Vec<LogRecord>, DbError>;
}

pub struct LedgerDb {
    pool: AnyPool,
}

impl LedgerDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Availability of `[start, end]` followed by the data `fetch` reads from it.
    ///
    /// The indexer commits rows before it advances the `states` bounds, so reading the bounds
    /// first guarantees the rows read afterwards cover at least what the status claims.
    async fn in_range<T, F, Fut>(
        &self,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
        fetch: F,
    ) -> anyhow::Result<LedgerResponse<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, DbError>> + Send,
        T: Send,
    {
        let status = match self.indexed_range().await? {
            Some(range) => range.assurance(start, end, end_timeout, chrono::Utc::now().timestamp().max(0) as u64),
            None => BlockAssuranceResult::NotOk,
        };
        if status != BlockAssuranceResult::Ok {
            tracing::debug!(start, end, ?status, "Requested range not fully indexed");
        }
        let data = fetch().await?;
        Ok(LedgerResponse { status, data })
    }
}

fn parse_hex<const N: usize>(column: &'static str, value: &str) -> Result<FixedBytes<N>, DbError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| DbError::BadHex { column, value: value.to_string() })?;
    FixedBytes::<N>::try_from(bytes.as_slice()).map_err(|_| DbError::BadHex { column, value: value.to_string() })
}

fn parse_bytes(column: &'static str, value: &str) -> Result<Bytes, DbError> {
    hex::decode(value.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|_| DbError::BadHex { column, value: value.to_string() })
}

fn parse_u64(column: &'static str, value: i64) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::BadNumber { column, value })
}

fn transaction_from_row(row: &sqlx::any::AnyRow) -> Result<TransactionRecord, DbError> {
    Ok(TransactionRecord {
        hash: parse_hex("hash", &row.try_get::<String, _>("hash")?)?,
        function_sig: parse_hex("function_sig", &row.try_get::<String, _>("function_sig")?)?,
        input: parse_bytes("input", &row.try_get::<String, _>("input")?)?,
        block_number: parse_u64("block_number", row.try_get("block_number")?)?,
        transaction_index: parse_u64("transaction_index", row.try_get("transaction_index")?)?,
        from_address: Address::from(parse_hex::<20>("from_address", &row.try_get::<String, _>("from_address")?)?),
        to_address: Address::from(parse_hex::<20>("to_address", &row.try_get::<String, _>("to_address")?)?),
        status: row.try_get::<i64, _>("status")? != 0,
        timestamp: parse_u64("timestamp", row.try_get("timestamp")?)?,
    })
}

fn log_from_row(row: &sqlx::any::AnyRow) -> Result<LogRecord, DbError> {
    let mut topics = vec![parse_hex("topic0", &row.try_get::<String, _>("topic0")?)?];
    for column in ["topic1", "topic2", "topic3"] {
        match row.try_get::<Option<String>, _>(column)? {
            Some(topic) => topics.push(parse_hex(column, &topic)?),
            None => break,
        }
    }
    Ok(LogRecord {
        transaction_hash: parse_hex("transaction_hash", &row.try_get::<String, _>("transaction_hash")?)?,
        address: Address::from(parse_hex::<20>("address", &row.try_get::<String, _>("address")?)?),
        topics,
        data: parse_bytes("data", &row.try_get::<String, _>("data")?)?,
        log_index: parse_u64("log_index", row.try_get("log_index")?)?,
        block_number: parse_u64("block_number", row.try_get("block_number")?)?,
        timestamp: parse_u64("timestamp", row.try_get("timestamp")?)?,
    })
}

#[async_trait]
impl LedgerIndexerDb for LedgerDb {
    async fn insert_transactions(&self, transactions: &[TransactionRecord]) -> Result<(), DbError> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in transactions.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let p = i * 9;
                    format!(
                        "(${},${},${},${},${},${},${},${},${})",
                        p + 1,
                        p + 2,
                        p + 3,
                        p + 4,
                        p + 5,
                        p + 6,
                        p + 7,
                        p + 8,
                        p + 9
                    )
                })
                .collect();
            let query = format!(
                r#"INSERT INTO transactions
                (hash, function_sig, input, block_number, transaction_index, from_address, to_address, status, timestamp)
                VALUES {}
                ON CONFLICT (hash) DO NOTHING"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for t in chunk {
                q = q
                    .bind(hex::encode(t.hash))
                    .bind(hex::encode(t.function_sig))
                    .bind(hex::encode(&t.input))
                    .bind(t.block_number as i64)
                    .bind(t.transaction_index as i64)
                    .bind(hex::encode(t.from_address))
                    .bind(hex::encode(t.to_address))
                    .bind(i64::from(t.status))
                    .bind(t.timestamp as i64);
            }
            q.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_logs(&self, logs: &[LogRecord]) -> Result<(), DbError> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in logs.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let p = i * 10;
                    format!(
                        "(${},${},${},${},${},${},${},${},${},${})",
                        p + 1,
                        p + 2,
                        p + 3,
                        p + 4,
                        p + 5,
                        p + 6,
                        p + 7,
                        p + 8,
                        p + 9,
                        p + 10
                    )
                })
                .collect();
            let query = format!(
                r#"INSERT INTO logs
                (transaction_hash, log_index, address, topic0, topic1, topic2, topic3, data, block_number, timestamp)
                VALUES {}
                ON CONFLICT (transaction_hash, log_index) DO NOTHING"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for log in chunk {
                let topic = |i: usize| log.topics.get(i).map(hex::encode);
                q = q
                    .bind(hex::encode(log.transaction_hash))
                    .bind(log.log_index as i64)
                    .bind(hex::encode(log.address))
                    .bind(topic(0).unwrap_or_default())
                    .bind(topic(1))
                    .bind(topic(2))
                    .bind(topic(3))
                    .bind(hex::encode(&log.data))
                    .bind(log.block_number as i64)
                    .bind(log.timestamp as i64);
            }
            q.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_state(&self, name: &str, block_number: u64, block_timestamp: u64) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO states (name, block_number, block_timestamp, updated)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name)
            DO UPDATE SET
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp,
                updated = EXCLUDED.updated"#,
        )
        .bind(name)
        .bind(block_number as i64)
        .bind(block_timestamp as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn indexed_range(&self) -> Result<Option<IndexedRange>, DbError> {
        let rows = sqlx::query("SELECT name, block_timestamp FROM states WHERE name = $1 OR name = $2")
            .bind(FIRST_DATABASE_BLOCK)
            .bind(LAST_DATABASE_BLOCK)
            .fetch_all(&self.pool)
            .await?;

        let (mut first, mut last) = (None, None);
        for row in rows {
            let timestamp = parse_u64("block_timestamp", row.try_get("block_timestamp")?)?;
            match row.try_get::<String, _>("name")?.as_str() {
                FIRST_DATABASE_BLOCK => first = Some(timestamp),
                LAST_DATABASE_BLOCK => last = Some(timestamp),
                _ => {}
            }
        }
        Ok(first.zip(last).map(|(first_timestamp, last_timestamp)| IndexedRange { first_timestamp, last_timestamp }))
    }

    async fn transactions(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
    ) -> Result<Vec<TransactionRecord>, DbError> {
        let query = r#"
            SELECT hash, function_sig, input, block_number, transaction_index, from_address, to_address, status, timestamp
            FROM transactions
            WHERE to_address = $1 AND function_sig = $2 AND timestamp >= $3 AND timestamp <= $4
            ORDER BY block_number ASC, transaction_index ASC
        "#;

        let rows = sqlx::query(query)
            .bind(hex::encode(to))
            .bind(hex::encode(selector))
            .bind(start as i64)
            .bind(end as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn logs(&self, address: Address, topic0: B256, start: u64, end: u64) -> Result<Vec<LogRecord>, DbError> {
        let query = r#"
            SELECT transaction_hash, log_index, address, topic0, topic1, topic2, topic3, data, block_number, timestamp
            FROM logs
            WHERE address = $1 AND topic0 = $2 AND timestamp >= $3 AND timestamp <= $4
            ORDER BY block_number ASC, log_index ASC
        "#;

        let rows = sqlx::query(query)
            .bind(hex::encode(address))
            .bind(hex::encode(topic0))
            .bind(start as i64)
            .bind(end as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(log_from_row).collect()
    }
}

#[async_trait]
impl Ledger for LedgerDb {
    async fn transactions_in_range(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Vec<TransactionRecord>>> {
        self.in_range(start, end, end_timeout, move || self.transactions(to, selector, start, end)).await
    }

    async fn logs_in_range(
        &self,
        address: Address,
        topic0: B256,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<LogRecord>>> {
        self.in_range(start, end, None, move || self.logs(address, topic0, start, end)).await
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{bytes, fixed_bytes};
    use tempfile::NamedTempFile;

    use super::*;

    async fn test_db() -> (LedgerDb, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = LedgerDb::new(&format!("sqlite:{}", file.path().display())).await.unwrap();
        (db, file)
    }

    fn transaction(hash_byte: u8, block_number: u64, transaction_index: u64, timestamp: u64) -> TransactionRecord {
        TransactionRecord {
            hash: B256::repeat_byte(hash_byte),
            function_sig: fixed_bytes!("6c532fae"),
            input: bytes!("6c532fae64000001f4"),
            block_number,
            transaction_index,
            from_address: Address::repeat_byte(0x11),
            to_address: Address::repeat_byte(0xa1),
            status: true,
            timestamp,
        }
    }

    #[test]
    fn assurance_of_partially_indexed_range() {
        let range = IndexedRange { first_timestamp: 100, last_timestamp: 200 };
        assert_eq!(range.assurance(100, 200, None, 1_000), BlockAssuranceResult::Ok);
        assert_eq!(range.assurance(99, 150, None, 1_000), BlockAssuranceResult::NotOk);
        assert_eq!(range.assurance(150, 250, None, 1_000), BlockAssuranceResult::NotOk);
        assert_eq!(range.assurance(150, 250, Some(30), 280), BlockAssuranceResult::NotOk);
        assert_eq!(range.assurance(150, 250, Some(30), 281), BlockAssuranceResult::TimeoutOk);
    }

    #[tokio::test]
    async fn transactions_in_range_are_ordered_and_filtered() {
        let (db, _file) = test_db().await;
        let mut other_contract = transaction(4, 11, 0, 150);
        other_contract.to_address = Address::repeat_byte(0xa2);
        let mut failed = transaction(5, 9, 1, 140);
        failed.status = false;
        db.insert_transactions(&[transaction(1, 12, 0, 160), transaction(2, 11, 1, 150), transaction(3, 11, 0, 150)])
            .await
            .unwrap();
        db.insert_transactions(&[other_contract, failed, transaction(6, 30, 0, 301)]).await.unwrap();
        db.set_state(FIRST_DATABASE_BLOCK, 1, 100).await.unwrap();
        db.set_state(LAST_DATABASE_BLOCK, 20, 200).await.unwrap();

        let response = db
            .transactions_in_range(Address::repeat_byte(0xa1), fixed_bytes!("6c532fae"), 100, 200, None)
            .await
            .unwrap();
        assert_eq!(response.status, BlockAssuranceResult::Ok);
        let hashes: Vec<_> = response.data.iter().map(|t| t.hash[0]).collect();
        assert_eq!(hashes, vec![5, 3, 2, 1]);
        assert!(!response.data[0].status);
        assert_eq!(response.data[1], transaction(3, 11, 0, 150));

        let response = db
            .transactions_in_range(Address::repeat_byte(0xa1), fixed_bytes!("6c532fae"), 150, 400, None)
            .await
            .unwrap();
        assert_eq!(response.status, BlockAssuranceResult::NotOk);
    }

    #[tokio::test]
    async fn status_does_not_cover_rows_indexed_after_it() {
        let (db, _file) = test_db().await;
        let (to, selector) = (Address::repeat_byte(0xa1), fixed_bytes!("6c532fae"));
        db.insert_transactions(&[transaction(1, 12, 0, 160)]).await.unwrap();
        db.set_state(FIRST_DATABASE_BLOCK, 1, 100).await.unwrap();
        db.set_state(LAST_DATABASE_BLOCK, 15, 170).await.unwrap();

        // The indexer catches up between reading the bounds and reading the rows.
        let db_ref = &db;
        let response = db
            .in_range(100, 200, None, move || async move {
                db_ref.insert_transactions(&[transaction(2, 18, 0, 190)]).await?;
                db_ref.set_state(LAST_DATABASE_BLOCK, 20, 200).await?;
                db_ref.transactions(to, selector, 100, 200).await
            })
            .await
            .unwrap();
        assert_eq!(response.status, BlockAssuranceResult::NotOk);
        assert_eq!(response.data.len(), 2);

        let response = db.transactions_in_range(to, selector, 100, 200, None).await.unwrap();
        assert_eq!(response.status, BlockAssuranceResult::Ok);
        let hashes: Vec<_> = response.data.iter().map(|t| t.hash[0]).collect();
        assert_eq!(hashes, vec![1, 2]);
    }

    #[tokio::test]
    async fn logs_keep_their_topics() {
        let (db, _file) = test_db().await;
        let log = LogRecord {
            transaction_hash: B256::repeat_byte(9),
            address: Address::repeat_byte(0xa4),
            topics: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
            data: bytes!("00ff"),
            log_index: 3,
            block_number: 5,
            timestamp: 120,
        };
        db.insert_logs(&[log.clone(), log.clone()]).await.unwrap();

        assert_eq!(db.indexed_range().await.unwrap(), None);
        let response =
            db.logs_in_range(Address::repeat_byte(0xa4), B256::repeat_byte(1), 100, 200).await.unwrap();
        assert_eq!(response.status, BlockAssuranceResult::NotOk);
        assert_eq!(response.data, vec![log]);
        assert!(db.logs(Address::repeat_byte(0xa4), B256::repeat_byte(2), 100, 200).await.unwrap().is_empty());
    }
}
