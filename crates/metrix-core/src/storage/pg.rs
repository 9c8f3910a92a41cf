//! PostgreSQL backend.
//!
//! Two tables, one per kind, keyed by metric name:
//! - `gauges (name TEXT PRIMARY KEY, value DOUBLE PRECISION)`: upsert replaces
//! - `counters (name TEXT PRIMARY KEY, value BIGINT)`: upsert adds `EXCLUDED.value`
//!
//! Accumulation happens inside the `ON CONFLICT` clause, so there is no
//! read-modify-write window between concurrent writers of one counter.
//!
//! Every write takes a transaction-scoped advisory lock per name (sorted
//! order) before checking the other table, so a name can never land in both.
//!
//! The connection is opened at startup and re-established lazily when the
//! server drops it.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use postgres::{Client, Config, NoTls, Transaction};
use tracing::{debug, info, warn};

use super::{Storage, StoreError};
use crate::metric::{MetricBatch, MetricKind, MetricValue, validate_name};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    name  TEXT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    name  TEXT PRIMARY KEY,
    value BIGINT NOT NULL
);
";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (name, value) VALUES ($1, $2) \
     ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value";

const UPSERT_COUNTER: &str = "INSERT INTO counters (name, value) VALUES ($1, $2) \
     ON CONFLICT (name) DO UPDATE SET value = counters.value + EXCLUDED.value";

const UPSERT_COUNTER_RETURNING: &str = "INSERT INTO counters (name, value) VALUES ($1, $2) \
     ON CONFLICT (name) DO UPDATE SET value = counters.value + EXCLUDED.value \
     RETURNING value";

const LOCK_NAME: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const SELECT_GAUGE: &str = "SELECT value FROM gauges WHERE name = $1";
const SELECT_COUNTER: &str = "SELECT value FROM counters WHERE name = $1";
const SELECT_GAUGES: &str = "SELECT name, value FROM gauges ORDER BY name";
const SELECT_COUNTERS: &str = "SELECT name, value FROM counters ORDER BY name";
const GAUGE_NAMES_IN: &str = "SELECT name FROM gauges WHERE name = ANY($1)";
const COUNTER_NAMES_IN: &str = "SELECT name FROM counters WHERE name = ANY($1)";

pub struct PgStorage {
    config: Config,
    client: Mutex<Option<Client>>,
}

impl PgStorage {
    /// Connects with a libpq-style DSN (`host=... user=...` or `postgres://...`)
    /// and creates the tables when absent.
    pub fn connect(dsn: &str) -> Result<Self, StoreError> {
        let mut config =
            Config::from_str(dsn).map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(CONNECT_TIMEOUT);
        }

        let mut client = config.connect(NoTls)?;
        client.batch_execute(MIGRATIONS)?;
        info!(
            hosts = ?config.get_hosts(),
            dbname = config.get_dbname().unwrap_or("-"),
            "postgres storage ready"
        );

        Ok(Self {
            config,
            client: Mutex::new(Some(client)),
        })
    }

    /// Runs `op` on the shared connection, reconnecting first if it was lost.
    fn with_client<T>(
        &self,
        op: impl FnOnce(&mut Client) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.client.lock();
        let client = match guard.take() {
            Some(c) if !c.is_closed() => c,
            _ => {
                debug!("postgres: reconnecting");
                let mut c = self.config.connect(NoTls)?;
                c.batch_execute(MIGRATIONS)?;
                c
            }
        };
        let client = guard.insert(client);

        let result = op(client);
        if result.is_err() && client.is_closed() {
            warn!("postgres: connection lost");
            *guard = None;
        }
        result
    }

    fn with_transaction<T>(
        &self,
        op: impl FnOnce(&mut Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_client(|client| {
            let mut tx = client.transaction()?;
            // Dropping an uncommitted transaction rolls it back.
            let value = op(&mut tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

/// Serializes writers of the same names until the transaction ends.
fn lock_names(tx: &mut Transaction<'_>, names: &[&str]) -> Result<(), StoreError> {
    let mut names = names.to_vec();
    names.sort_unstable();
    names.dedup();
    let stmt = tx.prepare(LOCK_NAME)?;
    for name in names {
        tx.execute(&stmt, &[&name])?;
    }
    Ok(())
}

/// Fails when any of `names` already exists in the table queried by `sql`.
fn ensure_absent(
    tx: &mut Transaction<'_>,
    sql: &str,
    names: Vec<&str>,
    stored_as: MetricKind,
) -> Result<(), StoreError> {
    if names.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = names.into_iter().map(str::to_string).collect();
    if let Some(row) = tx.query(sql, &[&names])?.first() {
        let name: String = row.get(0);
        return Err(StoreError::retyped(&name, stored_as));
    }
    Ok(())
}

fn write_gauges<'a>(
    tx: &mut Transaction<'_>,
    entries: impl Iterator<Item = (&'a String, &'a f64)>,
) -> Result<(), StoreError> {
    let stmt = tx.prepare(UPSERT_GAUGE)?;
    for (name, value) in entries {
        tx.execute(&stmt, &[&name, &value])?;
    }
    Ok(())
}

fn write_counters<'a>(
    tx: &mut Transaction<'_>,
    entries: impl Iterator<Item = (&'a String, &'a i64)>,
) -> Result<(), StoreError> {
    let stmt = tx.prepare(UPSERT_COUNTER)?;
    for (name, delta) in entries {
        tx.execute(&stmt, &[&name, &delta])?;
    }
    Ok(())
}

fn check_names<'a>(names: impl Iterator<Item = &'a String>) -> Result<Vec<&'a str>, StoreError> {
    names
        .map(|n| validate_name(n).map(|_| n.as_str()).map_err(StoreError::from))
        .collect()
}

impl Storage for PgStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        validate_name(name)?;
        self.with_transaction(|tx| {
            lock_names(tx, &[name])?;
            ensure_absent(tx, COUNTER_NAMES_IN, vec![name], MetricKind::Counter)?;
            tx.execute(UPSERT_GAUGE, &[&name, &value])?;
            Ok(())
        })
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        validate_name(name)?;
        self.with_transaction(|tx| {
            lock_names(tx, &[name])?;
            ensure_absent(tx, GAUGE_NAMES_IN, vec![name], MetricKind::Gauge)?;
            tx.execute(UPSERT_COUNTER, &[&name, &delta])?;
            Ok(())
        })
    }

    fn update(&self, name: &str, value: MetricValue) -> Result<MetricValue, StoreError> {
        let delta = match value {
            MetricValue::Gauge(v) => return self.set_gauge(name, v).map(|_| value),
            MetricValue::Counter(delta) => delta,
        };
        validate_name(name)?;
        self.with_transaction(|tx| {
            lock_names(tx, &[name])?;
            ensure_absent(tx, GAUGE_NAMES_IN, vec![name], MetricKind::Gauge)?;
            let row = tx.query_one(UPSERT_COUNTER_RETURNING, &[&name, &delta])?;
            Ok(MetricValue::Counter(row.get(0)))
        })
    }

    fn gauge(&self, name: &str) -> Result<f64, StoreError> {
        self.with_client(|client| {
            client
                .query_opt(SELECT_GAUGE, &[&name])?
                .map(|row| row.get::<_, f64>(0))
                .ok_or_else(|| StoreError::not_found(MetricKind::Gauge, name))
        })
    }

    fn counter(&self, name: &str) -> Result<i64, StoreError> {
        self.with_client(|client| {
            client
                .query_opt(SELECT_COUNTER, &[&name])?
                .map(|row| row.get::<_, i64>(0))
                .ok_or_else(|| StoreError::not_found(MetricKind::Counter, name))
        })
    }

    fn set_gauges(&self, batch: &HashMap<String, f64>) -> Result<(), StoreError> {
        let names = check_names(batch.keys())?;
        self.with_transaction(|tx| {
            lock_names(tx, &names)?;
            ensure_absent(tx, COUNTER_NAMES_IN, names, MetricKind::Counter)?;
            write_gauges(tx, batch.iter())
        })
    }

    fn set_counters(&self, batch: &HashMap<String, i64>) -> Result<(), StoreError> {
        let names = check_names(batch.keys())?;
        self.with_transaction(|tx| {
            lock_names(tx, &names)?;
            ensure_absent(tx, GAUGE_NAMES_IN, names, MetricKind::Gauge)?;
            write_counters(tx, batch.iter())
        })
    }

    fn update_batch(&self, batch: &MetricBatch) -> Result<(), StoreError> {
        let gauge_names = check_names(batch.gauges.keys())?;
        let counter_names = check_names(batch.counters.keys())?;
        self.with_transaction(|tx| {
            let all: Vec<&str> = gauge_names.iter().chain(&counter_names).copied().collect();
            lock_names(tx, &all)?;
            ensure_absent(tx, COUNTER_NAMES_IN, gauge_names, MetricKind::Counter)?;
            ensure_absent(tx, GAUGE_NAMES_IN, counter_names, MetricKind::Gauge)?;
            write_gauges(tx, batch.gauges.iter())?;
            write_counters(tx, batch.counters.iter())
        })
    }

    fn gauges(&self) -> Result<BTreeMap<String, f64>, StoreError> {
        self.with_client(|client| {
            Ok(client
                .query(SELECT_GAUGES, &[])?
                .iter()
                .map(|row| (row.get::<_, String>(0), row.get::<_, f64>(1)))
                .collect())
        })
    }

    fn counters(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        self.with_client(|client| {
            Ok(client
                .query(SELECT_COUNTERS, &[])?
                .iter()
                .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
                .collect())
        })
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.with_client(|client| Ok(client.is_valid(PING_TIMEOUT)?))
    }
}
