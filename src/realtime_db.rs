//! Firebase Realtime Database backend for uploads.
//!
//! Talks to the database REST API with an OAuth2 access token minted from the
//! admin service account (RS256 JWT exchanged at Google's token endpoint).
//! Layout: metadata at `uploads/{id}`, rows at `uploadRows/{id}/{n}`.

use crate::config::FirebaseConfig;
use crate::schema::{NormalizedRow, Upload};
use crate::upload_store::{sort_newest_first, UploadStore};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DATABASE_SCOPES: &str =
    "https://www.googleapis.com/auth/firebase.database https://www.googleapis.com/auth/userinfo.email";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

#[derive(Clone)]
pub struct RealtimeDbStore {
    client: Client,
    config: FirebaseConfig,
    token_cache: Arc<Mutex<Option<CachedToken>>>,
}

impl RealtimeDbStore {
    pub fn new(config: FirebaseConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Get a valid OAuth2 access token, refreshing when within a minute of expiry.
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.token_cache.lock().await;
        let now = now_secs();
        if let Some(ref cached) = *cache {
            if now < cached.expires_at.saturating_sub(60) {
                return Ok(cached.access_token.clone());
            }
        }

        let claims = serde_json::json!({
            "iss": self.config.client_email,
            "scope": DATABASE_SCOPES,
            "aud": TOKEN_URI,
            "iat": now,
            "exp": now + 3600,
        });

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(self.config.private_key.as_bytes())
            .context("Invalid RSA private key in FIREBASE_ADMIN_PRIVATE_KEY")?;
        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key).context("Failed to encode JWT")?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let resp: TokenResponse = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .context("Token exchange request failed")?
            .error_for_status()
            .context("Token exchange returned error")?
            .json()
            .await
            .context("Failed to parse token response")?;

        debug!("Minted database access token, expires in {}s", resp.expires_in);
        let token = resp.access_token.clone();
        *cache = Some(CachedToken {
            access_token: resp.access_token,
            expires_at: now + resp.expires_in,
        });
        Ok(token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.config.database_url, path)
    }

    /// Issue one REST call and return the decoded JSON body.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.access_token().await?;
        let mut req = self
            .client
            .request(method.clone(), self.url(path))
            .query(&[("access_token", token.as_str())]);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} {}: {} - {}", method, path, status, text));
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response for {}", path))
    }
}

#[async_trait::async_trait]
impl UploadStore for RealtimeDbStore {
    fn name(&self) -> &str {
        "realtime-db"
    }

    async fn put_upload(&self, upload: &Upload) -> Result<()> {
        let body = serde_json::to_value(upload)?;
        self.request(Method::PUT, &format!("uploads/{}", upload.id), Some(&body))
            .await?;
        info!("Stored upload metadata {}", upload.id);
        Ok(())
    }

    async fn put_rows(&self, upload_id: &str, start: usize, rows: &[NormalizedRow]) -> Result<()> {
        let body = rows_patch_body(start, rows)?;
        self.request(Method::PATCH, &format!("uploadRows/{}", upload_id), Some(&body))
            .await?;
        debug!("Stored {} rows for {} at {}", rows.len(), upload_id, start);
        Ok(())
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>> {
        let value = self
            .request(Method::GET, &format!("uploads/{}", upload_id), None)
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let upload = serde_json::from_value(value)
            .with_context(|| format!("Malformed upload record {}", upload_id))?;
        Ok(Some(upload))
    }

    async fn list_uploads(&self) -> Result<Vec<Upload>> {
        let value = self.request(Method::GET, "uploads", None).await?;
        uploads_from_value(value)
    }

    async fn get_rows(&self, upload_id: &str) -> Result<Vec<NormalizedRow>> {
        let value = self
            .request(Method::GET, &format!("uploadRows/{}", upload_id), None)
            .await?;
        rows_from_value(value)
    }
}

/// Multi-location update body: `{ "<n>": row, ... }`.
fn rows_patch_body(start: usize, rows: &[NormalizedRow]) -> Result<Value> {
    let mut map = Map::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        let mut value = serde_json::to_value(row)?;
        rewrite_raw_keys(&mut value, encode_key);
        map.insert((start + offset).to_string(), value);
    }
    Ok(Value::Object(map))
}

/// Records that do not decode are skipped so one bad entry cannot hide the rest.
fn uploads_from_value(value: Value) -> Result<Vec<Upload>> {
    let mut uploads: Vec<Upload> = match value {
        Value::Null => Vec::new(),
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(id, v)| match serde_json::from_value(v) {
                Ok(upload) => Some(upload),
                Err(e) => {
                    warn!("Skipping malformed upload record {}: {}", id, e);
                    None
                }
            })
            .collect(),
        other => return Err(anyhow!("Unexpected uploads payload: {}", other)),
    };
    sort_newest_first(&mut uploads);
    Ok(uploads)
}

/// Characters the database refuses in keys, plus the escape character itself.
const RESERVED_KEY_CHARS: &[char] = &['%', '.', '$', '#', '[', ']', '/'];

/// Percent-encode reserved and control characters so sheet headers are valid keys.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if RESERVED_KEY_CHARS.contains(&c) || c.is_ascii_control() {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let escaped = rest
            .get(idx + 1..idx + 3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .filter(u8::is_ascii);
        match escaped {
            Some(byte) => {
                out.push(byte as char);
                rest = &rest[idx + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[idx + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Apply `f` to the header keys of a row's `_rawData` object.
fn rewrite_raw_keys(row: &mut Value, f: fn(&str) -> String) {
    if let Some(Value::Object(raw)) = row.get_mut("_rawData") {
        let entries = std::mem::take(raw);
        *raw = entries.into_iter().map(|(k, v)| (f(&k), v)).collect();
    }
}

/// The database returns integer-keyed children as an array (with nulls for
/// gaps) or as an object, depending on key density.
fn rows_from_value(value: Value) -> Result<Vec<NormalizedRow>> {
    let mut keyed: Vec<(usize, Value)> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|n| (n, v)))
            .collect(),
        other => return Err(anyhow!("Unexpected rows payload: {}", other)),
    };
    keyed.sort_by_key(|(n, _)| *n);

    keyed
        .into_iter()
        .map(|(n, mut v)| {
            rewrite_raw_keys(&mut v, decode_key);
            serde_json::from_value(v).with_context(|| format!("Malformed row {}", n))
        })
        .collect()
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::FieldValue;
    use crate::report_type::{CanonicalField, Module, ReportType};
    use crate::schema::RawRecord;
    use serde_json::json;

    fn row(n: usize) -> NormalizedRow {
        NormalizedRow::new(n, RawRecord::new())
            .with(CanonicalField::RoomNumber, FieldValue::Text(format!("{}", 100 + n)))
    }

    #[test]
    fn test_rows_patch_body_uses_sequential_keys() {
        let body = rows_patch_body(100, &[row(101), row(102)]).unwrap();
        let map = body.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["100"]["_rowNumber"], 101);
        assert_eq!(map["101"]["roomNumber"], "202");
    }

    #[test]
    fn test_rows_from_array_and_object() {
        let a = serde_json::to_value(row(1)).unwrap();
        let b = serde_json::to_value(row(2)).unwrap();

        let from_array = rows_from_value(json!([a.clone(), null, b.clone()])).unwrap();
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_array[1].row_number, 2);

        let from_object = rows_from_value(json!({ "10": b, "2": a })).unwrap();
        assert_eq!(from_object[0].row_number, 1);
        assert_eq!(from_object[1].row_number, 2);

        assert!(rows_from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_uploads_from_value() {
        let mut older = Upload::new(
            "uid".into(),
            Module::FrontOffice,
            ReportType::PaymentJournal,
            "a.xlsx".into(),
        );
        older.uploaded_at = "2024-01-01T00:00:00.000Z".into();
        let mut newer = older.clone();
        newer.id = "upload_newer".into();
        newer.uploaded_at = "2024-05-01T00:00:00.000Z".into();

        let mut map = Map::new();
        map.insert(older.id.clone(), serde_json::to_value(&older).unwrap());
        map.insert(newer.id.clone(), serde_json::to_value(&newer).unwrap());
        let uploads = uploads_from_value(Value::Object(map)).unwrap();
        assert_eq!(uploads[0].id, "upload_newer");
        assert_eq!(uploads.len(), 2);

        assert!(uploads_from_value(Value::Null).unwrap().is_empty());
        assert!(uploads_from_value(json!(42)).is_err());
    }

    #[test]
    fn test_uploads_listing_skips_malformed_record() {
        let good = Upload::new(
            "uid".into(),
            Module::FrontOffice,
            ReportType::PaymentJournal,
            "journal.csv".into(),
        );
        let mut legacy = serde_json::to_value(&good).unwrap();
        legacy["status"] = json!("error");

        let mut map = Map::new();
        map.insert(good.id.clone(), serde_json::to_value(&good).unwrap());
        map.insert("upload_legacy".into(), legacy);
        map.insert("upload_junk".into(), json!("not a record"));

        let uploads = uploads_from_value(Value::Object(map)).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].id, good.id);
    }

    fn assert_keys_storable(value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    assert!(
                        !key.chars().any(|c| ".$#[]/".contains(c) || c.is_ascii_control()),
                        "key {:?} is not storable",
                        key
                    );
                    assert_keys_storable(child);
                }
            }
            Value::Array(items) => items.iter().for_each(assert_keys_storable),
            _ => {}
        }
    }

    #[test]
    fn test_raw_headers_with_reserved_characters() {
        let csv = b"Date,Room Type,No. of Rooms,Revenue,Tax [%],Ref #/$\n2024-01-01,Deluxe,3,450,12,A1\n";
        let outcome = crate::ingest::ingest(csv, ReportType::RoomRevenueBreakdown).unwrap();
        assert_eq!(outcome.rows[0].number(CanonicalField::Rooms), Some(3.0));

        let body = rows_patch_body(0, &outcome.rows).unwrap();
        assert_keys_storable(&body);
        assert!(body["0"]["_rawData"].get("No%2E of Rooms").is_some());

        let rows = rows_from_value(body).unwrap();
        assert_eq!(rows.len(), 1);
        for header in ["No. of Rooms", "Tax [%]", "Ref #/$", "Room Type"] {
            assert!(rows[0].raw.get(header).is_some(), "lost header {}", header);
        }
        assert_eq!(rows[0].number(CanonicalField::Rooms), Some(3.0));
    }

    #[test]
    fn test_key_encoding_round_trip() {
        for key in ["plain", "No. of Rooms", "100%", "%2E literal", "tab\there", "trailing %"] {
            assert_eq!(decode_key(&encode_key(key)), key);
        }
        assert_eq!(encode_key("a.b/c"), "a%2Eb%2Fc");
        assert_eq!(decode_key("50%"), "50%");
    }

    #[test]
    fn test_url_layout() {
        let store = RealtimeDbStore::new(FirebaseConfig {
            database_url: "https://hotel-default-rtdb.firebaseio.com".into(),
            client_email: "svc@hotel.iam.gserviceaccount.com".into(),
            private_key: String::new(),
        });
        assert_eq!(
            store.url("uploadRows/upload_1"),
            "https://hotel-default-rtdb.firebaseio.com/uploadRows/upload_1.json"
        );
    }
}
