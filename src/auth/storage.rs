// Token storage media
// SQLite key-value file (primary) and an in-process cookie jar (fallback)

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::{TokenPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY, TOKEN_KEYS};
use crate::error::Result;

/// Default lifetime of the refresh-token cookie
pub const DEFAULT_REFRESH_COOKIE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Which medium holds the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Process-wide persistent key-value file
    Persistent,
    /// Cookie jar fallback
    Cookie,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Persistent => write!(f, "persistent"),
            StorageKind::Cookie => write!(f, "cookie"),
        }
    }
}

/// Storage settings, fixed at construction
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite file for the primary medium; `None` disables it
    pub db_path: Option<PathBuf>,
    /// Mark cookies `Secure` (production deployments)
    pub secure_cookies: bool,
    /// Refresh cookie lifetime, independent of the real refresh-token lifetime
    pub refresh_cookie_max_age: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            secure_cookies: false,
            refresh_cookie_max_age: DEFAULT_REFRESH_COOKIE_MAX_AGE,
        }
    }
}

/// Raw values read back from a medium
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
}

/// A medium able to hold the three credential keys
pub trait TokenMedium: Send {
    /// Medium kind, for diagnostics
    fn kind(&self) -> StorageKind;

    /// Write all three keys; readers never observe a partial pair
    fn store_pair(&mut self, pair: &TokenPair, now_ms: i64) -> Result<()>;

    /// Read the three keys as of `now_ms`
    fn load(&self, now_ms: i64) -> Result<StoredTokens>;

    /// Remove the three keys; removing absent keys is not an error
    fn clear(&mut self) -> Result<()>;

    /// `Set-Cookie` values a cookie-based medium would emit
    fn set_cookie_headers(&self, _now_ms: i64) -> Vec<String> {
        Vec::new()
    }
}

// === SQLite medium ===

/// Persistent medium backed by an `auth_kv` table
pub struct SqliteMedium {
    conn: Connection,
    path: PathBuf,
}

impl SqliteMedium {
    /// Open (creating if needed) the token database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::error::AuthError::Storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM auth_kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }
}

impl TokenMedium for SqliteMedium {
    fn kind(&self) -> StorageKind {
        StorageKind::Persistent
    }

    fn store_pair(&mut self, pair: &TokenPair, _now_ms: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)")?;
            stmt.execute([ACCESS_TOKEN_KEY, pair.access_token.as_str()])?;
            stmt.execute([REFRESH_TOKEN_KEY, pair.refresh_token.as_str()])?;
            stmt.execute([TOKEN_EXPIRY_KEY, pair.expires_at_ms.to_string().as_str()])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, _now_ms: i64) -> Result<StoredTokens> {
        let expires_at_ms = self
            .read(TOKEN_EXPIRY_KEY)?
            .and_then(|raw| match raw.parse::<i64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    tracing::warn!("Ignoring malformed stored token expiry: {:?}", raw);
                    None
                }
            });

        Ok(StoredTokens {
            access_token: self.read(ACCESS_TOKEN_KEY)?,
            refresh_token: self.read(REFRESH_TOKEN_KEY)?,
            expires_at_ms,
        })
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM auth_kv WHERE key IN (?1, ?2, ?3)",
            TOKEN_KEYS,
        )?;
        Ok(())
    }
}

// === Cookie medium ===

/// A single cookie with the attributes the jar enforces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires_at_ms: i64,
    pub secure: bool,
}

impl Cookie {
    /// Whether the cookie is still live at `now_ms`
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }

    /// Render as a `Set-Cookie` header value
    pub fn to_set_cookie(&self) -> String {
        let expires = DateTime::<Utc>::from_timestamp_millis(self.expires_at_ms)
            .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            .unwrap_or_default();

        let mut header = format!(
            "{}={}; Path=/; Expires={}; SameSite=Strict",
            self.name, self.value, expires
        );
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

/// Fallback medium mirroring the three keys as cookies
#[derive(Debug, Default)]
pub struct CookieMedium {
    jar: HashMap<String, Cookie>,
    secure: bool,
    refresh_max_age: Duration,
}

impl CookieMedium {
    /// Create an empty jar
    pub fn new(secure: bool, refresh_max_age: Duration) -> Self {
        Self {
            jar: HashMap::new(),
            secure,
            refresh_max_age,
        }
    }

    fn set(&mut self, name: &str, value: String, expires_at_ms: i64) {
        self.jar.insert(
            name.to_string(),
            Cookie {
                name: name.to_string(),
                value,
                expires_at_ms,
                secure: self.secure,
            },
        );
    }

    fn get(&self, name: &str, now_ms: i64) -> Option<&Cookie> {
        self.jar.get(name).filter(|c| c.is_live(now_ms))
    }

}

impl TokenMedium for CookieMedium {
    fn kind(&self) -> StorageKind {
        StorageKind::Cookie
    }

    fn store_pair(&mut self, pair: &TokenPair, now_ms: i64) -> Result<()> {
        let max_age_ms = i64::try_from(self.refresh_max_age.as_millis()).unwrap_or(i64::MAX);
        let refresh_expiry = now_ms.saturating_add(max_age_ms);
        self.set(ACCESS_TOKEN_KEY, pair.access_token.clone(), pair.expires_at_ms);
        self.set(REFRESH_TOKEN_KEY, pair.refresh_token.clone(), refresh_expiry);
        self.set(
            TOKEN_EXPIRY_KEY,
            pair.expires_at_ms.to_string(),
            pair.expires_at_ms,
        );
        Ok(())
    }

    fn load(&self, now_ms: i64) -> Result<StoredTokens> {
        Ok(StoredTokens {
            access_token: self.get(ACCESS_TOKEN_KEY, now_ms).map(|c| c.value.clone()),
            refresh_token: self.get(REFRESH_TOKEN_KEY, now_ms).map(|c| c.value.clone()),
            expires_at_ms: self
                .get(TOKEN_EXPIRY_KEY, now_ms)
                .and_then(|c| c.value.parse().ok()),
        })
    }

    fn clear(&mut self) -> Result<()> {
        for key in TOKEN_KEYS {
            self.jar.remove(key);
        }
        Ok(())
    }

    fn set_cookie_headers(&self, now_ms: i64) -> Vec<String> {
        let mut live: Vec<&Cookie> = self.jar.values().filter(|c| c.is_live(now_ms)).collect();
        live.sort_by(|a, b| a.name.cmp(&b.name));
        live.into_iter().map(Cookie::to_set_cookie).collect()
    }
}

// === Medium selection ===

/// Selected media: the active one plus a standby cleared defensively
pub struct Media {
    pub active: Box<dyn TokenMedium>,
    pub standby: Option<Box<dyn TokenMedium>>,
}

/// Probe the primary medium once and fall back to cookies if it is unavailable
pub fn open_media(config: &StorageConfig) -> Media {
    let cookies = || -> Box<dyn TokenMedium> {
        Box::new(CookieMedium::new(
            config.secure_cookies,
            config.refresh_cookie_max_age,
        ))
    };

    let Some(path) = config.db_path.as_deref() else {
        tracing::info!("No token database configured, using cookie storage");
        return Media {
            active: cookies(),
            standby: None,
        };
    };

    match SqliteMedium::open(path) {
        Ok(medium) => {
            tracing::info!("Token storage: {}", medium.path().display());
            Media {
                active: Box::new(medium),
                standby: Some(cookies()),
            }
        }
        Err(e) => {
            tracing::warn!(
                "Token database unavailable ({}), falling back to cookie storage: {}",
                path.display(),
                e
            );
            Media {
                active: cookies(),
                standby: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(expires_at_ms: i64) -> TokenPair {
        TokenPair {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at_ms,
        }
    }

    #[test]
    fn test_sqlite_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut medium = SqliteMedium::open(&dir.path().join("tokens.sqlite3")).unwrap();

        medium.store_pair(&pair(1_700_000_000_000), 0).unwrap();
        let loaded = medium.load(0).unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("access-1"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(loaded.expires_at_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_sqlite_expiry_is_decimal_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.sqlite3");
        let mut medium = SqliteMedium::open(&path).unwrap();
        medium.store_pair(&pair(1_234_567), 0).unwrap();

        let raw: String = medium
            .conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = 'token_expiry'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, "1234567");
    }

    #[test]
    fn test_sqlite_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut medium = SqliteMedium::open(&dir.path().join("tokens.sqlite3")).unwrap();
        medium.store_pair(&pair(5), 0).unwrap();

        medium.clear().unwrap();
        medium.clear().unwrap();
        assert_eq!(medium.load(0).unwrap(), StoredTokens::default());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.sqlite3");
        {
            let mut medium = SqliteMedium::open(&path).unwrap();
            medium.store_pair(&pair(42), 0).unwrap();
        }
        let medium = SqliteMedium::open(&path).unwrap();
        assert_eq!(medium.load(0).unwrap().access_token.as_deref(), Some("access-1"));
    }

    #[test]
    fn test_cookie_attributes() {
        let mut jar = CookieMedium::new(true, Duration::from_secs(30 * 24 * 3600));
        let now = 1_000_000;
        jar.store_pair(&pair(now + 3_600_000), now).unwrap();

        let access = jar.get(ACCESS_TOKEN_KEY, now).unwrap();
        assert_eq!(access.expires_at_ms, now + 3_600_000);
        assert!(access.secure);

        let refresh = jar.get(REFRESH_TOKEN_KEY, now).unwrap();
        assert_eq!(refresh.expires_at_ms, now + 30 * 24 * 3_600_000);

        let headers = jar.set_cookie_headers(now);
        assert_eq!(headers.len(), 3);
        assert!(headers.iter().all(|h| h.contains("SameSite=Strict")));
        assert!(headers.iter().all(|h| h.ends_with("; Secure")));
    }

    #[test]
    fn test_cookie_not_secure_outside_production() {
        let mut jar = CookieMedium::new(false, DEFAULT_REFRESH_COOKIE_MAX_AGE);
        jar.store_pair(&pair(10_000), 0).unwrap();
        assert!(jar
            .set_cookie_headers(0)
            .iter()
            .all(|h| !h.contains("Secure")));
    }

    #[test]
    fn test_expired_cookies_read_as_absent() {
        let mut jar = CookieMedium::new(false, Duration::from_secs(60));
        jar.store_pair(&pair(10_000), 0).unwrap();

        let later = jar.load(20_000).unwrap();
        assert_eq!(later.access_token, None);
        assert_eq!(later.expires_at_ms, None);
        assert_eq!(later.refresh_token.as_deref(), Some("refresh-1"));

        let much_later = jar.load(120_000).unwrap();
        assert_eq!(much_later, StoredTokens::default());
    }

    #[test]
    fn test_huge_refresh_max_age_saturates() {
        let mut jar = CookieMedium::new(false, Duration::from_secs(u64::MAX));
        let now = 1_000_000;
        jar.store_pair(&pair(now + 3_600_000), now).unwrap();

        let refresh = jar.get(REFRESH_TOKEN_KEY, now).unwrap();
        assert_eq!(refresh.expires_at_ms, i64::MAX);
        assert_eq!(jar.load(now).unwrap().refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_open_media_prefers_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let media = open_media(&StorageConfig {
            db_path: Some(dir.path().join("tokens.sqlite3")),
            ..StorageConfig::default()
        });
        assert_eq!(media.active.kind(), StorageKind::Persistent);
        assert!(media.standby.is_some());
    }

    #[test]
    fn test_open_media_falls_back_when_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be used as a parent directory
        let media = open_media(&StorageConfig {
            db_path: Some(file.path().join("tokens.sqlite3")),
            ..StorageConfig::default()
        });
        assert_eq!(media.active.kind(), StorageKind::Cookie);
        assert!(media.standby.is_none());
    }

    #[test]
    fn test_open_media_without_path_uses_cookies() {
        let media = open_media(&StorageConfig::default());
        assert_eq!(media.active.kind(), StorageKind::Cookie);
    }
}
