//! Relational store over sqlite.
//!
//! One connection behind a mutex; every write autocommits. Readers on the
//! dashboard thread see a consistent row-level snapshot.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use meshrelay_proto::{now_epoch_secs, payload_type_name, route_type_name};

use crate::records::{
    AdvertObservation, AdvertRow, CumulativeCounts, FloodPolicy, NoiseFloorStats, NoiseSample,
    PacketFilter, PacketRecord, PacketStats, PacketTypeStats, ReasonCount, RouteStats,
    TransportKey, TransportKeyUpdate, TypeCount,
};

const PACKET_COLUMNS: &str = "timestamp, type, route, length, rssi, snr, score, \
     transmitted, is_duplicate, drop_reason, src_hash, dst_hash, path_hash, \
     header, transport_codes, payload, payload_length, \
     tx_delay_ms, packet_hash, original_path, forwarded_path, raw_packet";

const ADVERT_COLUMNS: &str = "id, timestamp, pubkey, node_name, is_repeater, route_type, \
     contact_type, latitude, longitude, first_seen, last_seen, rssi, snr, \
     advert_count, is_new_neighbor";

const KEY_COLUMNS: &str =
    "id, name, flood_policy, transport_key, parent_id, last_used, created_at, updated_at";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS packets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                type INTEGER NOT NULL,
                route INTEGER NOT NULL,
                length INTEGER NOT NULL,
                rssi INTEGER,
                snr REAL,
                score REAL,
                transmitted BOOLEAN NOT NULL,
                is_duplicate BOOLEAN NOT NULL,
                drop_reason TEXT,
                src_hash TEXT,
                dst_hash TEXT,
                path_hash TEXT,
                header TEXT,
                transport_codes TEXT,
                payload TEXT,
                payload_length INTEGER,
                tx_delay_ms REAL,
                packet_hash TEXT,
                original_path TEXT,
                forwarded_path TEXT,
                raw_packet TEXT
            );
            CREATE TABLE IF NOT EXISTS adverts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                pubkey TEXT NOT NULL UNIQUE,
                node_name TEXT,
                is_repeater BOOLEAN NOT NULL,
                route_type INTEGER,
                contact_type TEXT,
                latitude REAL,
                longitude REAL,
                first_seen REAL NOT NULL,
                last_seen REAL NOT NULL,
                rssi INTEGER,
                snr REAL,
                advert_count INTEGER NOT NULL DEFAULT 1,
                is_new_neighbor BOOLEAN NOT NULL
            );
            CREATE TABLE IF NOT EXISTS noise_floor (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                noise_floor_dbm REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transport_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                flood_policy TEXT NOT NULL CHECK (flood_policy IN ('allow', 'deny')),
                transport_key TEXT NOT NULL,
                last_used REAL,
                parent_id INTEGER,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL,
                FOREIGN KEY (parent_id) REFERENCES transport_keys(id)
            );
            CREATE INDEX IF NOT EXISTS idx_packets_timestamp ON packets(timestamp);
            CREATE INDEX IF NOT EXISTS idx_packets_type ON packets(type);
            CREATE INDEX IF NOT EXISTS idx_packets_hash ON packets(packet_hash);
            CREATE INDEX IF NOT EXISTS idx_packets_transmitted ON packets(transmitted);
            CREATE INDEX IF NOT EXISTS idx_adverts_timestamp ON adverts(timestamp);
            CREATE INDEX IF NOT EXISTS idx_adverts_pubkey ON adverts(pubkey);
            CREATE INDEX IF NOT EXISTS idx_noise_timestamp ON noise_floor(timestamp);
            CREATE INDEX IF NOT EXISTS idx_transport_keys_name ON transport_keys(name);
            CREATE INDEX IF NOT EXISTS idx_transport_keys_parent ON transport_keys(parent_id);",
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection")
    }

    pub fn store_packet(&self, record: &PacketRecord) -> rusqlite::Result<()> {
        let original_path = record
            .original_path
            .as_ref()
            .map(|path| serde_json::to_string(path).unwrap_or_default());
        let forwarded_path = record
            .forwarded_path
            .as_ref()
            .map(|path| serde_json::to_string(path).unwrap_or_default());
        self.lock().execute(
            &format!("INSERT INTO packets ({PACKET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"),
            params![
                record.timestamp,
                record.packet_type,
                record.route,
                record.length,
                record.rssi,
                record.snr,
                record.score,
                record.transmitted,
                record.is_duplicate,
                record.drop_reason,
                record.src_hash,
                record.dst_hash,
                record.path_hash,
                record.header,
                record.transport_codes,
                record.payload,
                record.payload_length,
                record.tx_delay_ms,
                record.packet_hash,
                original_path,
                forwarded_path,
                record.raw_packet,
            ],
        )?;
        Ok(())
    }

    /// Atomic upsert keyed on pubkey. Returns true when this observation
    /// created the neighbor (advert_count == 1).
    pub fn upsert_advert(&self, obs: &AdvertObservation) -> rusqlite::Result<bool> {
        let count: i64 = self.lock().query_row(
            "INSERT INTO adverts (
                timestamp, pubkey, node_name, is_repeater, route_type, contact_type,
                latitude, longitude, first_seen, last_seen, rssi, snr, advert_count, is_new_neighbor
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?1, ?1, ?9, ?10, 1, 1)
             ON CONFLICT(pubkey) DO UPDATE SET
                timestamp = excluded.timestamp,
                node_name = excluded.node_name,
                is_repeater = excluded.is_repeater,
                route_type = excluded.route_type,
                contact_type = excluded.contact_type,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                last_seen = excluded.last_seen,
                rssi = excluded.rssi,
                snr = excluded.snr,
                advert_count = advert_count + 1,
                is_new_neighbor = 0
             RETURNING advert_count",
            params![
                obs.timestamp,
                obs.pubkey,
                obs.node_name,
                obs.is_repeater,
                obs.route_type,
                obs.contact_type,
                obs.latitude,
                obs.longitude,
                obs.rssi,
                obs.snr,
            ],
            |row| row.get(0),
        )?;
        Ok(count == 1)
    }

    pub fn store_noise_floor(&self, timestamp: f64, noise_floor_dbm: f64) -> rusqlite::Result<()> {
        self.lock().execute(
            "INSERT INTO noise_floor (timestamp, noise_floor_dbm) VALUES (?1, ?2)",
            params![timestamp, noise_floor_dbm],
        )?;
        Ok(())
    }

    pub fn packet_stats(&self, hours: u32) -> rusqlite::Result<PacketStats> {
        let cutoff = now_epoch_secs() - f64::from(hours) * 3600.0;
        let conn = self.lock();

        let (total, transmitted, dropped, avg_rssi, avg_snr, avg_score, avg_len, avg_delay) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(transmitted), 0),
                        COALESCE(SUM(CASE WHEN transmitted = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(AVG(rssi), 0),
                        COALESCE(AVG(snr), 0),
                        COALESCE(AVG(score), 0),
                        COALESCE(AVG(payload_length), 0),
                        COALESCE(AVG(tx_delay_ms), 0)
                 FROM packets WHERE timestamp > ?1",
                params![cutoff],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                    ))
                },
            )?;

        let mut packet_types = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT type, COUNT(*) AS count FROM packets WHERE timestamp > ?1
             GROUP BY type ORDER BY count DESC",
        )?;
        let mut rows = stmt.query(params![cutoff])?;
        while let Some(row) = rows.next()? {
            packet_types.push(TypeCount {
                value: row.get::<_, i64>(0)? as u8,
                count: row.get::<_, i64>(1)?.max(0) as u64,
            });
        }

        let mut drop_reasons = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT drop_reason, COUNT(*) AS count FROM packets
             WHERE timestamp > ?1 AND transmitted = 0 AND drop_reason IS NOT NULL
             GROUP BY drop_reason ORDER BY count DESC",
        )?;
        let mut rows = stmt.query(params![cutoff])?;
        while let Some(row) = rows.next()? {
            drop_reasons.push(ReasonCount {
                reason: row.get(0)?,
                count: row.get::<_, i64>(1)?.max(0) as u64,
            });
        }

        Ok(PacketStats {
            total_packets: total.max(0) as u64,
            transmitted_packets: transmitted.max(0) as u64,
            dropped_packets: dropped.max(0) as u64,
            avg_rssi: round1(avg_rssi),
            avg_snr: round1(avg_snr),
            avg_score: round3(avg_score),
            avg_payload_length: round1(avg_len),
            avg_tx_delay: round1(avg_delay),
            packet_types,
            drop_reasons,
        })
    }

    pub fn recent_packets(&self, limit: u32) -> rusqlite::Result<Vec<PacketRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKET_COLUMNS} FROM packets ORDER BY timestamp DESC LIMIT ?1"
        ))?;
        let mut rows = stmt.query(params![limit])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(packet_from_row(row)?);
        }
        Ok(records)
    }

    pub fn filtered_packets(&self, filter: &PacketFilter) -> rusqlite::Result<Vec<PacketRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(packet_type) = filter.packet_type {
            clauses.push("type = ?");
            values.push(Box::new(packet_type));
        }
        if let Some(route) = filter.route {
            clauses.push("route = ?");
            values.push(Box::new(route));
        }
        if let Some(start) = filter.start_timestamp {
            clauses.push("timestamp >= ?");
            values.push(Box::new(start));
        }
        if let Some(end) = filter.end_timestamp {
            clauses.push("timestamp <= ?");
            values.push(Box::new(end));
        }

        let mut query = format!("SELECT {PACKET_COLUMNS} FROM packets");
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY timestamp DESC LIMIT ?");
        values.push(Box::new(filter.limit.unwrap_or(1000)));

        let conn = self.lock();
        let mut stmt = conn.prepare(&query)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut rows = stmt.query(params_ref.as_slice())?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(packet_from_row(row)?);
        }
        Ok(records)
    }

    pub fn packet_by_hash(&self, packet_hash: &str) -> rusqlite::Result<Option<PacketRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKET_COLUMNS} FROM packets WHERE packet_hash = ?1 LIMIT 1"
        ))?;
        stmt.query_row(params![packet_hash], |row| packet_from_row(row))
            .optional()
    }

    pub fn packet_type_stats(&self, hours: u32) -> rusqlite::Result<PacketTypeStats> {
        let cutoff = now_epoch_secs() - f64::from(hours) * 3600.0;
        let conn = self.lock();
        let mut totals = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT type, COUNT(*) FROM packets WHERE timestamp > ?1 GROUP BY type",
        )?;
        let mut rows = stmt.query(params![cutoff])?;
        while let Some(row) = rows.next()? {
            let packet_type: i64 = row.get(0)?;
            let count: i64 = row.get(1)?;
            if count > 0 {
                let name = if packet_type > 15 {
                    "Other Types (>15)".to_string()
                } else {
                    payload_type_name(packet_type as u8).to_string()
                };
                *totals.entry(name).or_insert(0) += count.max(0) as u64;
            }
        }
        let total_packets = totals.values().sum();
        Ok(PacketTypeStats {
            hours,
            packet_type_totals: totals,
            total_packets,
            period: format!("{hours} hours"),
            data_source: "sqlite",
        })
    }

    pub fn route_stats(&self, hours: u32) -> rusqlite::Result<RouteStats> {
        let cutoff = now_epoch_secs() - f64::from(hours) * 3600.0;
        let conn = self.lock();
        let mut totals = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT route, COUNT(*) FROM packets WHERE timestamp > ?1 GROUP BY route")?;
        let mut rows = stmt.query(params![cutoff])?;
        while let Some(row) = rows.next()? {
            let route: i64 = row.get(0)?;
            let count: i64 = row.get(1)?;
            if count > 0 {
                let name = if route > 3 {
                    "Other Routes (>3)".to_string()
                } else {
                    route_type_name(route as u8).to_string()
                };
                *totals.entry(name).or_insert(0) += count.max(0) as u64;
            }
        }
        let total_packets = totals.values().sum();
        Ok(RouteStats {
            hours,
            route_totals: totals,
            total_packets,
            period: format!("{hours} hours"),
            data_source: "sqlite",
        })
    }

    /// Neighbor view: one row per pubkey ordered by recency.
    pub fn neighbors(&self) -> rusqlite::Result<Vec<AdvertRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ADVERT_COLUMNS} FROM adverts ORDER BY last_seen DESC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut neighbors = Vec::new();
        while let Some(row) = rows.next()? {
            neighbors.push(advert_from_row(row)?);
        }
        Ok(neighbors)
    }

    pub fn adverts_by_contact_type(
        &self,
        contact_type: &str,
        limit: Option<u32>,
        hours: Option<u32>,
    ) -> rusqlite::Result<Vec<AdvertRow>> {
        let mut query = format!("SELECT {ADVERT_COLUMNS} FROM adverts WHERE contact_type = ?1");
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(contact_type.to_string())];
        if let Some(hours) = hours {
            query.push_str(" AND timestamp > ?");
            values.push(Box::new(now_epoch_secs() - f64::from(hours) * 3600.0));
        }
        query.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = limit {
            query.push_str(" LIMIT ?");
            values.push(Box::new(limit));
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&query)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut rows = stmt.query(params_ref.as_slice())?;
        let mut adverts = Vec::new();
        while let Some(row) = rows.next()? {
            adverts.push(advert_from_row(row)?);
        }
        Ok(adverts)
    }

    pub fn noise_floor_history(&self, hours: u32) -> rusqlite::Result<Vec<NoiseSample>> {
        let cutoff = now_epoch_secs() - f64::from(hours) * 3600.0;
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, noise_floor_dbm FROM noise_floor
             WHERE timestamp > ?1 ORDER BY timestamp ASC",
        )?;
        let mut rows = stmt.query(params![cutoff])?;
        let mut samples = Vec::new();
        while let Some(row) = rows.next()? {
            samples.push(NoiseSample {
                timestamp: row.get(0)?,
                noise_floor_dbm: row.get(1)?,
            });
        }
        Ok(samples)
    }

    pub fn noise_floor_stats(&self, hours: u32) -> rusqlite::Result<NoiseFloorStats> {
        let cutoff = now_epoch_secs() - f64::from(hours) * 3600.0;
        self.lock().query_row(
            "SELECT COUNT(*),
                    COALESCE(AVG(noise_floor_dbm), 0),
                    COALESCE(MIN(noise_floor_dbm), 0),
                    COALESCE(MAX(noise_floor_dbm), 0)
             FROM noise_floor WHERE timestamp > ?1",
            params![cutoff],
            |row| {
                Ok(NoiseFloorStats {
                    measurement_count: row.get::<_, i64>(0)?.max(0) as u64,
                    avg_noise_floor: round1(row.get(1)?),
                    min_noise_floor: round1(row.get(2)?),
                    max_noise_floor: round1(row.get(3)?),
                    hours,
                })
            },
        )
    }

    /// Cumulative totals since the beginning of the table, feeding the
    /// time-series counter sources.
    pub fn cumulative_counts(&self) -> rusqlite::Result<CumulativeCounts> {
        let conn = self.lock();
        let mut counts = CumulativeCounts::default();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM packets GROUP BY type")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let packet_type: i64 = row.get(0)?;
            let count = row.get::<_, i64>(1)?.max(0) as u64;
            if (0..16).contains(&packet_type) {
                counts.type_counts[packet_type as usize] += count;
            } else {
                counts.type_counts[16] += count;
            }
            counts.rx_total += count;
        }
        counts.tx_total = conn
            .query_row("SELECT COUNT(*) FROM packets WHERE transmitted = 1", [], |row| {
                row.get::<_, i64>(0)
            })?
            .max(0) as u64;
        counts.drop_total = counts.rx_total.saturating_sub(counts.tx_total);
        Ok(counts)
    }

    pub fn cleanup_old_data(&self, days: u32) -> rusqlite::Result<(usize, usize, usize)> {
        let cutoff = now_epoch_secs() - f64::from(days) * 24.0 * 3600.0;
        let conn = self.lock();
        let packets = conn.execute("DELETE FROM packets WHERE timestamp < ?1", params![cutoff])?;
        let adverts = conn.execute("DELETE FROM adverts WHERE timestamp < ?1", params![cutoff])?;
        let noise =
            conn.execute("DELETE FROM noise_floor WHERE timestamp < ?1", params![cutoff])?;
        Ok((packets, adverts, noise))
    }

    pub fn create_transport_key(
        &self,
        name: &str,
        flood_policy: FloodPolicy,
        transport_key: &str,
        parent_id: Option<i64>,
        last_used: Option<f64>,
    ) -> rusqlite::Result<i64> {
        let now = now_epoch_secs();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO transport_keys (name, flood_policy, transport_key, parent_id, last_used, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![name, flood_policy.as_str(), transport_key, parent_id, last_used, now, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn transport_keys(&self) -> rusqlite::Result<Vec<TransportKey>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM transport_keys ORDER BY created_at ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(key_from_row(row)?);
        }
        Ok(keys)
    }

    pub fn transport_key(&self, key_id: i64) -> rusqlite::Result<Option<TransportKey>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM transport_keys WHERE id = ?1"
        ))?;
        stmt.query_row(params![key_id], |row| key_from_row(row)).optional()
    }

    pub fn update_transport_key(
        &self,
        key_id: i64,
        update: &TransportKeyUpdate,
    ) -> rusqlite::Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = &update.name {
            sets.push("name = ?");
            values.push(Box::new(name.clone()));
        }
        if let Some(policy) = update.flood_policy {
            sets.push("flood_policy = ?");
            values.push(Box::new(policy.as_str()));
        }
        if let Some(key) = &update.transport_key {
            sets.push("transport_key = ?");
            values.push(Box::new(key.clone()));
        }
        if let Some(parent_id) = update.parent_id {
            sets.push("parent_id = ?");
            values.push(Box::new(parent_id));
        }
        if let Some(last_used) = update.last_used {
            sets.push("last_used = ?");
            values.push(Box::new(last_used));
        }
        if sets.is_empty() {
            return Ok(false);
        }
        sets.push("updated_at = ?");
        values.push(Box::new(now_epoch_secs()));
        values.push(Box::new(key_id));

        let query = format!(
            "UPDATE transport_keys SET {} WHERE id = ?",
            sets.join(", ")
        );
        let conn = self.lock();
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = conn.execute(&query, params_ref.as_slice())?;
        Ok(changed > 0)
    }

    pub fn delete_transport_key(&self, key_id: i64) -> rusqlite::Result<bool> {
        let changed = self
            .lock()
            .execute("DELETE FROM transport_keys WHERE id = ?1", params![key_id])?;
        Ok(changed > 0)
    }

    /// Stamp a key as just used by the flood-policy check.
    pub fn touch_transport_key(&self, key_id: i64, timestamp: f64) -> rusqlite::Result<()> {
        self.lock().execute(
            "UPDATE transport_keys SET last_used = ?1 WHERE id = ?2",
            params![timestamp, key_id],
        )?;
        Ok(())
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn packet_from_row(row: &rusqlite::Row) -> rusqlite::Result<PacketRecord> {
    let original_path: Option<String> = row.get(19)?;
    let forwarded_path: Option<String> = row.get(20)?;
    Ok(PacketRecord {
        timestamp: row.get(0)?,
        packet_type: row.get::<_, i64>(1)? as u8,
        route: row.get::<_, i64>(2)? as u8,
        length: row.get::<_, i64>(3)?.max(0) as u32,
        rssi: row.get::<_, Option<i32>>(4)?.unwrap_or_default(),
        snr: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
        score: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
        transmitted: row.get(7)?,
        is_duplicate: row.get(8)?,
        drop_reason: row.get(9)?,
        src_hash: row.get(10)?,
        dst_hash: row.get(11)?,
        path_hash: row.get(12)?,
        header: row.get(13)?,
        transport_codes: row.get(14)?,
        payload: row.get(15)?,
        payload_length: row.get::<_, Option<i64>>(16)?.unwrap_or_default().max(0) as u32,
        tx_delay_ms: row.get::<_, Option<f64>>(17)?.unwrap_or_default(),
        packet_hash: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
        original_path: original_path.and_then(|path| serde_json::from_str(&path).ok()),
        forwarded_path: forwarded_path.and_then(|path| serde_json::from_str(&path).ok()),
        raw_packet: row.get(21)?,
    })
}

fn advert_from_row(row: &rusqlite::Row) -> rusqlite::Result<AdvertRow> {
    Ok(AdvertRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        pubkey: row.get(2)?,
        node_name: row.get(3)?,
        is_repeater: row.get(4)?,
        route_type: row.get::<_, Option<i64>>(5)?.map(|value| value as u8),
        contact_type: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        first_seen: row.get(9)?,
        last_seen: row.get(10)?,
        rssi: row.get(11)?,
        snr: row.get(12)?,
        advert_count: row.get(13)?,
        is_new_neighbor: row.get(14)?,
    })
}

fn key_from_row(row: &rusqlite::Row) -> rusqlite::Result<TransportKey> {
    let policy: String = row.get(2)?;
    Ok(TransportKey {
        id: row.get(0)?,
        name: row.get(1)?,
        flood_policy: FloodPolicy::parse(&policy).unwrap_or(FloodPolicy::Deny),
        transport_key: row.get(3)?,
        parent_id: row.get(4)?,
        last_used: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
