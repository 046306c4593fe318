//! Contract & bond store (C13): a persistent store over contracts and bonds.
//!
//! The distilled source models this over PostgreSQL with a vector-similarity
//! extension and an ORM layer; no such driver is available in this deployment's
//! dependency stack (design note, DESIGN.md). This implementation follows the
//! same "JSONB column, marked dirty on partial update" semantics over an
//! embedded, file-backed database behind a single shared connection lock,
//! mirroring the WAL-mode/prepared-statement/JSON-blob idiom already used for
//! signal storage elsewhere in this process.

use crate::core::bond::{Bond, BondStatus, FeatureBreakdown, Tier};
use crate::core::contract::{Contract, ContractStatus, OutcomePrice, Platform};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS contracts (
    platform TEXT NOT NULL,
    id TEXT NOT NULL,
    condition_id TEXT,
    token_ids_json TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    cleaned_title TEXT NOT NULL,
    cleaned_description TEXT NOT NULL,
    category TEXT NOT NULL,
    event_type TEXT NOT NULL,
    geo_scope TEXT NOT NULL,
    resolution_source TEXT,
    sport_subtype TEXT,
    is_parlay INTEGER NOT NULL,
    entities_json TEXT NOT NULL,
    outcome_schema_json TEXT NOT NULL,
    outcome_prices_json TEXT NOT NULL,
    time_window_json TEXT NOT NULL,
    embedding_json TEXT,
    volume REAL NOT NULL,
    liquidity REAL NOT NULL,
    fee_hint REAL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (platform, id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_contracts_condition_id ON contracts(condition_id);
CREATE INDEX IF NOT EXISTS idx_contracts_platform_status ON contracts(platform, status);

CREATE TABLE IF NOT EXISTS bonds (
    pair_id TEXT PRIMARY KEY,
    contract_a_id TEXT NOT NULL,
    contract_b_id TEXT NOT NULL,
    tier INTEGER NOT NULL,
    p_match REAL NOT NULL,
    similarity REAL NOT NULL,
    outcome_mapping_json TEXT NOT NULL,
    feature_breakdown_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_validated TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_bonds_tier_status ON bonds(tier, status);
CREATE INDEX IF NOT EXISTS idx_bonds_contract_a ON bonds(contract_a_id);
CREATE INDEX IF NOT EXISTS idx_bonds_contract_b ON bonds(contract_b_id);
"#;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open store at {db_path}"))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize contract/bond store schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(journal_mode, "WAL mode not active on contract/bond store");
        }

        let contract_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM contracts", [], |row| row.get(0))
            .unwrap_or(0);
        let bond_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bonds", [], |row| row.get(0))
            .unwrap_or(0);
        info!(contract_count, bond_count, db_path, "contract/bond store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- contracts ----

    pub fn upsert_contract(&self, contract: &Contract) -> Result<()> {
        let conn = self.conn.lock();
        Self::write_contract(&conn, contract)
    }

    fn write_contract(conn: &Connection, contract: &Contract) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO contracts (
                platform, id, condition_id, token_ids_json, title, description,
                cleaned_title, cleaned_description, category, event_type, geo_scope,
                resolution_source, sport_subtype, is_parlay, entities_json,
                outcome_schema_json, outcome_prices_json, time_window_json,
                embedding_json, volume, liquidity, fee_hint, status, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25
            )
            ON CONFLICT(platform, id) DO UPDATE SET
                condition_id = excluded.condition_id,
                token_ids_json = excluded.token_ids_json,
                title = excluded.title,
                description = excluded.description,
                cleaned_title = excluded.cleaned_title,
                cleaned_description = excluded.cleaned_description,
                category = excluded.category,
                event_type = excluded.event_type,
                geo_scope = excluded.geo_scope,
                resolution_source = excluded.resolution_source,
                sport_subtype = excluded.sport_subtype,
                is_parlay = excluded.is_parlay,
                entities_json = excluded.entities_json,
                outcome_schema_json = excluded.outcome_schema_json,
                outcome_prices_json = excluded.outcome_prices_json,
                time_window_json = excluded.time_window_json,
                embedding_json = excluded.embedding_json,
                volume = excluded.volume,
                liquidity = excluded.liquidity,
                fee_hint = excluded.fee_hint,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )?
        .execute(params![
            contract.platform.as_str(),
            contract.id,
            contract.condition_id,
            serde_json::to_string(&contract.token_ids)?,
            contract.title,
            contract.description,
            contract.cleaned_title,
            contract.cleaned_description,
            contract.category,
            contract.event_type,
            contract.geo_scope,
            contract.resolution_source,
            contract.sport_subtype,
            contract.is_parlay as i64,
            serde_json::to_string(&contract.entities)?,
            serde_json::to_string(&contract.outcome_schema)?,
            serde_json::to_string(&contract.outcome_prices)?,
            serde_json::to_string(&contract.time_window)?,
            contract
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            contract.volume,
            contract.liquidity,
            contract.fee_hint,
            status_to_str(contract.status),
            contract.created_at.to_rfc3339(),
            contract.updated_at.to_rfc3339(),
        ])?;
        Ok(())
    }

    pub fn get_contract(&self, platform: Platform, id: &str) -> Result<Option<Contract>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT platform, id, condition_id, token_ids_json, title, description,
                    cleaned_title, cleaned_description, category, event_type, geo_scope,
                    resolution_source, sport_subtype, is_parlay, entities_json,
                    outcome_schema_json, outcome_prices_json, time_window_json,
                    embedding_json, volume, liquidity, fee_hint, status, created_at, updated_at
             FROM contracts WHERE platform = ?1 AND id = ?2",
        )?;
        let result = stmt
            .query_row(params![platform.as_str(), id], row_to_contract)
            .ok();
        Ok(result)
    }

    pub fn get_contracts_by_ids(&self, platform: Platform, ids: &[String]) -> Result<Vec<Contract>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT platform, id, condition_id, token_ids_json, title, description,
                    cleaned_title, cleaned_description, category, event_type, geo_scope,
                    resolution_source, sport_subtype, is_parlay, entities_json,
                    outcome_schema_json, outcome_prices_json, time_window_json,
                    embedding_json, volume, liquidity, fee_hint, status, created_at, updated_at
             FROM contracts WHERE platform = ? AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let platform_str = platform.as_str();
        let mut query_params: Vec<&dyn rusqlite::ToSql> = vec![&platform_str];
        for id in ids {
            query_params.push(id);
        }
        let rows = stmt
            .query_map(rusqlite::params_from_iter(query_params), row_to_contract)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Active, embedded contracts on `platform`, for C6's brute-force scan.
    pub fn list_active_embedded(&self, platform: Platform) -> Result<Vec<Contract>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT platform, id, condition_id, token_ids_json, title, description,
                    cleaned_title, cleaned_description, category, event_type, geo_scope,
                    resolution_source, sport_subtype, is_parlay, entities_json,
                    outcome_schema_json, outcome_prices_json, time_window_json,
                    embedding_json, volume, liquidity, fee_hint, status, created_at, updated_at
             FROM contracts
             WHERE platform = ?1 AND status = 'active' AND embedding_json IS NOT NULL
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![platform.as_str()], row_to_contract)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Updates only the outcome prices and `updated_at` of a stored contract,
    /// per C11's "mark the JSON blob dirty" partial-update semantics.
    pub fn update_contract_prices(
        &self,
        platform: Platform,
        id: &str,
        outcome_prices: &[OutcomePrice],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn.prepare_cached(
            "UPDATE contracts SET outcome_prices_json = ?1, updated_at = ?2
             WHERE platform = ?3 AND id = ?4",
        )?
        .execute(params![
            serde_json::to_string(outcome_prices)?,
            now.to_rfc3339(),
            platform.as_str(),
            id,
        ])?;
        Ok(changed)
    }

    pub fn update_contract_status(
        &self,
        platform: Platform,
        id: &str,
        status: ContractStatus,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn.prepare_cached(
            "UPDATE contracts SET status = ?1 WHERE platform = ?2 AND id = ?3",
        )?
        .execute(params![status_to_str(status), platform.as_str(), id])?;
        Ok(changed)
    }

    // ---- bonds ----

    pub fn upsert_bond(&self, bond: &Bond) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO bonds (
                pair_id, contract_a_id, contract_b_id, tier, p_match, similarity,
                outcome_mapping_json, feature_breakdown_json, status, created_at, last_validated
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(pair_id) DO UPDATE SET
                tier = excluded.tier,
                p_match = excluded.p_match,
                similarity = excluded.similarity,
                outcome_mapping_json = excluded.outcome_mapping_json,
                feature_breakdown_json = excluded.feature_breakdown_json,
                status = excluded.status,
                last_validated = excluded.last_validated",
        )?
        .execute(params![
            bond.pair_id,
            bond.contract_a_id,
            bond.contract_b_id,
            tier_to_i64(bond.tier),
            bond.p_match,
            bond.similarity,
            serde_json::to_string(&bond.outcome_mapping)?,
            serde_json::to_string(&bond.feature_breakdown)?,
            bond_status_to_str(bond.status),
            bond.created_at.to_rfc3339(),
            bond.last_validated.to_rfc3339(),
        ])?;
        Ok(())
    }

    pub fn get_bond(&self, pair_id: &str) -> Result<Option<Bond>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT pair_id, contract_a_id, contract_b_id, tier, p_match, similarity,
                    outcome_mapping_json, feature_breakdown_json, status, created_at, last_validated
             FROM bonds WHERE pair_id = ?1",
        )?;
        Ok(stmt.query_row(params![pair_id], row_to_bond).ok())
    }

    pub fn list_bonds_by_status(&self, status: BondStatus) -> Result<Vec<Bond>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT pair_id, contract_a_id, contract_b_id, tier, p_match, similarity,
                    outcome_mapping_json, feature_breakdown_json, status, created_at, last_validated
             FROM bonds WHERE status = ?1",
        )?;
        let rows = stmt
            .query_map(params![bond_status_to_str(status)], row_to_bond)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_bonds_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Bond>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT pair_id, contract_a_id, contract_b_id, tier, p_match, similarity,
                    outcome_mapping_json, feature_breakdown_json, status, created_at, last_validated
             FROM bonds WHERE created_at >= ?1 AND status != 'retired'",
        )?;
        let rows = stmt
            .query_map(params![since.to_rfc3339()], row_to_bond)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn retire_bond(&self, pair_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("UPDATE bonds SET status = 'retired' WHERE pair_id = ?1")?
            .execute(params![pair_id])?;
        Ok(())
    }

    pub fn mark_bond_validated(&self, pair_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("UPDATE bonds SET last_validated = ?1 WHERE pair_id = ?2")?
            .execute(params![now.to_rfc3339(), pair_id])?;
        Ok(())
    }

    /// Union of (platform, id) pairs referenced by any active bond — the
    /// bonded set C11 refreshes each cycle.
    pub fn bonded_contract_ids(&self) -> Result<(Vec<String>, Vec<String>)> {
        let active = self.list_bonds_by_status(BondStatus::Active)?;
        let mut exchange_a_ids = Vec::new();
        let mut exchange_b_ids = Vec::new();
        for bond in active {
            exchange_a_ids.push(bond.contract_a_id);
            exchange_b_ids.push(bond.contract_b_id);
        }
        exchange_a_ids.sort();
        exchange_a_ids.dedup();
        exchange_b_ids.sort();
        exchange_b_ids.dedup();
        Ok((exchange_a_ids, exchange_b_ids))
    }
}

fn status_to_str(status: ContractStatus) -> &'static str {
    match status {
        ContractStatus::Active => "active",
        ContractStatus::Closed => "closed",
        ContractStatus::Resolved => "resolved",
    }
}

fn bond_status_to_str(status: BondStatus) -> &'static str {
    match status {
        BondStatus::Active => "active",
        BondStatus::Paused => "paused",
        BondStatus::Retired => "retired",
    }
}

fn tier_to_i64(tier: Tier) -> i64 {
    tier as i64
}

fn tier_from_i64(value: i64) -> Tier {
    match value {
        1 => Tier::One,
        2 => Tier::Two,
        _ => Tier::Three,
    }
}

fn row_to_contract(row: &rusqlite::Row) -> rusqlite::Result<Contract> {
    let platform_str: String = row.get(0)?;
    let platform = if platform_str == "exchange_a" {
        Platform::ExchangeA
    } else {
        Platform::ExchangeB
    };
    let status_str: String = row.get(22)?;
    let status = match status_str.as_str() {
        "closed" => ContractStatus::Closed,
        "resolved" => ContractStatus::Resolved,
        _ => ContractStatus::Active,
    };

    let token_ids_json: String = row.get(3)?;
    let entities_json: String = row.get(14)?;
    let outcome_schema_json: String = row.get(15)?;
    let outcome_prices_json: String = row.get(16)?;
    let time_window_json: String = row.get(17)?;
    let embedding_json: Option<String> = row.get(18)?;
    let created_at_str: String = row.get(23)?;
    let updated_at_str: String = row.get(24)?;

    Ok(Contract {
        platform,
        id: row.get(1)?,
        condition_id: row.get(2)?,
        token_ids: serde_json::from_str(&token_ids_json).unwrap_or_default(),
        title: row.get(4)?,
        description: row.get(5)?,
        cleaned_title: row.get(6)?,
        cleaned_description: row.get(7)?,
        category: row.get(8)?,
        event_type: row.get(9)?,
        geo_scope: row.get(10)?,
        resolution_source: row.get(11)?,
        sport_subtype: row.get(12)?,
        is_parlay: row.get::<_, i64>(13)? != 0,
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        outcome_schema: serde_json::from_str(&outcome_schema_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(15, rusqlite::types::Type::Text, Box::new(e))
        })?,
        outcome_prices: serde_json::from_str(&outcome_prices_json).unwrap_or_default(),
        time_window: serde_json::from_str(&time_window_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(17, rusqlite::types::Type::Text, Box::new(e))
        })?,
        embedding: embedding_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .unwrap_or(None),
        volume: row.get(19)?,
        liquidity: row.get(20)?,
        fee_hint: row.get(21)?,
        status,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_bond(row: &rusqlite::Row) -> rusqlite::Result<Bond> {
    let tier_raw: i64 = row.get(3)?;
    let status_str: String = row.get(8)?;
    let status = match status_str.as_str() {
        "paused" => BondStatus::Paused,
        "retired" => BondStatus::Retired,
        _ => BondStatus::Active,
    };
    let outcome_mapping_json: String = row.get(6)?;
    let feature_breakdown_json: String = row.get(7)?;
    let created_at_str: String = row.get(9)?;
    let last_validated_str: String = row.get(10)?;

    Ok(Bond {
        pair_id: row.get(0)?,
        contract_a_id: row.get(1)?,
        contract_b_id: row.get(2)?,
        tier: tier_from_i64(tier_raw),
        p_match: row.get(4)?,
        similarity: row.get(5)?,
        outcome_mapping: serde_json::from_str(&outcome_mapping_json).unwrap_or_default(),
        feature_breakdown: serde_json::from_str::<FeatureBreakdown>(&feature_breakdown_json)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
            })?,
        status,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_validated: DateTime::parse_from_rfc3339(&last_validated_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
