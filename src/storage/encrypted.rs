//! SQLite-backed session store with AES-GCM encryption of event payloads.
//! Key derived from a server-held secret.
//!
//! Appends are idempotent per event: each event is identified by a keyed digest of its
//! contents, and events already recorded for the session are skipped. Re-sent batches
//! (beacon snapshots, retried publishes) therefore store nothing twice.

use crate::capture::{EditEvent, KeyEvent};
use crate::error::{Error, Result};
use crate::features::{EventSource, FeatureVector};
use crate::session::{Session, SessionState};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use ring::hmac;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

const KIND_KEYS: &str = "keys";
const KIND_EDITS: &str = "edits";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        state TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        closed_at INTEGER,
        total_keystrokes INTEGER NOT NULL DEFAULT 0,
        total_edits INTEGER NOT NULL DEFAULT 0,
        anomaly_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS event_batches (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        received_at INTEGER NOT NULL,
        payload_enc TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_batches_session ON event_batches(session_id, kind, seq);
    CREATE INDEX IF NOT EXISTS idx_batches_received ON event_batches(received_at);
    CREATE TABLE IF NOT EXISTS event_ids (
        session_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        seen_at INTEGER NOT NULL,
        PRIMARY KEY (session_id, kind, fingerprint)
    );
    CREATE INDEX IF NOT EXISTS idx_event_ids_seen ON event_ids(seen_at);
    CREATE TABLE IF NOT EXISTS rollups (
        session_id TEXT PRIMARY KEY,
        materialized_at INTEGER NOT NULL,
        payload TEXT NOT NULL
    );
"#;

fn derive_key(seed: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, seed);
    out[..h.as_ref().len().min(KEY_LEN)].copy_from_slice(h.as_ref());
    out
}

fn fingerprint_key(key: &[u8; KEY_LEN]) -> hmac::Key {
    let mut seed = key.to_vec();
    seed.extend_from_slice(b"event-id");
    hmac::Key::new(hmac::HMAC_SHA256, &derive_key(&seed))
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt((&nonce).into(), plaintext)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(BASE64.encode(&out))
}

fn decrypt(key: &[u8; KEY_LEN], encoded: &str) -> Result<Vec<u8>> {
    let raw = BASE64.decode(encoded)?;
    if raw.len() < NONCE_LEN {
        return Err(Error::Crypto("payload too short".to_string()));
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?;
    cipher
        .decrypt(nonce.into(), ct)
        .map_err(|e| Error::Crypto(e.to_string()))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let state: String = row.get(2)?;
    let closed_at: Option<i64> = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        document_id: row.get(1)?,
        state: SessionState::parse(&state),
        started_at: from_millis(row.get(3)?),
        closed_at: closed_at.map(from_millis),
        total_keystrokes: row.get::<_, i64>(5)? as u64,
        total_edits: row.get::<_, i64>(6)? as u64,
        anomaly_count: row.get::<_, i64>(7)? as u64,
    })
}

const SESSION_COLUMNS: &str =
    "id, document_id, state, started_at, closed_at, total_keystrokes, total_edits, anomaly_count";

pub struct SecureStore {
    conn: Mutex<Connection>,
    key: [u8; KEY_LEN],
    id_key: hmac::Key,
}

impl SecureStore {
    /// Open or create DB at path. Key is derived from `secret`.
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, secret)
    }

    pub fn open_in_memory(secret: &[u8]) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, secret)
    }

    fn with_connection(conn: Connection, secret: &[u8]) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let key = derive_key(secret);
        Ok(Self {
            conn: Mutex::new(conn),
            id_key: fingerprint_key(&key),
            key,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned("store connection"))
    }

    pub fn create_session(&self, document_id: &str) -> Result<Session> {
        let session = Session::new(document_id);
        self.conn()?.execute(
            "INSERT INTO sessions (id, document_id, state, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.document_id,
                session.state.as_str(),
                session.started_at.timestamp_millis()
            ],
        )?;
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let session = self
            .conn()?
            .query_row(&sql, params![id], session_from_row)
            .optional()?;
        Ok(session)
    }

    /// Mark closed. Closing a closed session returns it unchanged.
    pub fn close_session(&self, id: &str) -> Result<Session> {
        self.conn()?.execute(
            "UPDATE sessions SET state = ?2, closed_at = ?3 WHERE id = ?1 AND state != ?2",
            params![id, SessionState::Closed.as_str(), Utc::now().timestamp_millis()],
        )?;
        self.get_session(id)?
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    pub fn add_counters(&self, id: &str, keystrokes: u64, edits: u64, anomalies: u64) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE sessions SET total_keystrokes = total_keystrokes + ?2, \
             total_edits = total_edits + ?3, anomaly_count = anomaly_count + ?4 WHERE id = ?1",
            params![id, keystrokes as i64, edits as i64, anomalies as i64],
        )?;
        if n == 0 {
            return Err(Error::UnknownSession(id.to_string()));
        }
        Ok(())
    }

    /// Keyed digest per item. Repeats inside one batch are numbered so they stay distinct.
    fn fingerprints<T: Serialize>(&self, items: &[T]) -> Result<Vec<String>> {
        let mut seen: HashMap<Vec<u8>, u32> = HashMap::new();
        items
            .iter()
            .map(|item| -> Result<String> {
                let mut bytes = serde_json::to_vec(item)?;
                let n = seen.entry(bytes.clone()).or_insert(0);
                bytes.extend_from_slice(&n.to_be_bytes());
                *n += 1;
                Ok(BASE64.encode(hmac::sign(&self.id_key, &bytes).as_ref()))
            })
            .collect()
    }

    /// Store the items not seen before for this session and kind; returns them.
    fn append_batch<T: Serialize + Clone>(
        &self,
        session_id: &str,
        kind: &str,
        items: &[T],
    ) -> Result<Vec<T>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.fingerprints(items)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut fresh = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO event_ids (session_id, kind, fingerprint, seen_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (item, id) in items.iter().zip(&ids) {
                if stmt.execute(params![session_id, kind, id, now])? > 0 {
                    fresh.push(item.clone());
                }
            }
        }
        if !fresh.is_empty() {
            let enc = encrypt(&self.key, &serde_json::to_vec(&fresh)?)?;
            tx.execute(
                "INSERT INTO event_batches (session_id, kind, received_at, payload_enc) VALUES (?1, ?2, ?3, ?4)",
                params![session_id, kind, now, enc],
            )?;
        }
        tx.commit()?;
        Ok(fresh)
    }

    fn load_batches<T: DeserializeOwned>(&self, session_id: &str, kind: &str) -> Result<Vec<T>> {
        let payloads: Vec<String> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT payload_enc FROM event_batches WHERE session_id = ?1 AND kind = ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![session_id, kind], |row| row.get(0))?;
            let payloads = rows.collect::<rusqlite::Result<Vec<String>>>()?;
            payloads
        };
        let mut out = Vec::new();
        for enc in payloads {
            let plain = decrypt(&self.key, &enc)?;
            out.extend(serde_json::from_slice::<Vec<T>>(&plain)?);
        }
        Ok(out)
    }

    /// Append one batch of key events (stored encrypted). Returns the events that were
    /// new for the session; already-stored ones are skipped.
    pub fn append_key_events(&self, session_id: &str, events: &[KeyEvent]) -> Result<Vec<KeyEvent>> {
        self.append_batch(session_id, KIND_KEYS, events)
    }

    pub fn append_edit_events(&self, session_id: &str, edits: &[EditEvent]) -> Result<Vec<EditEvent>> {
        self.append_batch(session_id, KIND_EDITS, edits)
    }

    /// All key events of a session, in arrival order.
    pub fn load_key_events(&self, session_id: &str) -> Result<Vec<KeyEvent>> {
        self.load_batches(session_id, KIND_KEYS)
    }

    pub fn load_edit_events(&self, session_id: &str) -> Result<Vec<EditEvent>> {
        self.load_batches(session_id, KIND_EDITS)
    }

    pub fn store_vectors(&self, session_id: &str, vectors: &[FeatureVector]) -> Result<()> {
        let payload = serde_json::to_string(vectors)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO rollups (session_id, materialized_at, payload) VALUES (?1, ?2, ?3)",
            params![session_id, Utc::now().timestamp_millis(), payload],
        )?;
        Ok(())
    }

    pub fn load_vectors(&self, session_id: &str) -> Result<Option<Vec<FeatureVector>>> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM rollups WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(Error::from))
            .transpose()
    }

    /// Retention: delete event batches received before `ts` (epoch ms), along with
    /// the event ids recorded for them. Returns the number of batches deleted.
    pub fn prune_before(&self, ts: i64) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM event_batches WHERE received_at < ?1", params![ts])?;
        conn.execute("DELETE FROM event_ids WHERE seen_at < ?1", params![ts])?;
        Ok(n as u64)
    }
}

impl EventSource for SecureStore {
    fn key_events(&self, session_id: &str) -> Result<Vec<KeyEvent>> {
        self.load_key_events(session_id)
    }

    fn store_rollup(&self, session_id: &str, vectors: &[FeatureVector]) -> Result<()> {
        self.store_vectors(session_id, vectors)
    }

    fn load_rollup(&self, session_id: &str) -> Result<Option<Vec<FeatureVector>>> {
        self.load_vectors(session_id)
    }
}
