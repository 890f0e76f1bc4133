use crate::Result;
use cookie_store::{CookieStore as Store, RawCookie};
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// RFC 6265 cookie jar written through to a JSON file.
///
/// Session cookies are persisted too, so the service session survives between
/// processes until [`FileCookieJar::clear`] deletes the file. Expiry, path and
/// domain scoping follow `cookie_store`.
pub struct FileCookieJar {
    path: PathBuf,
    store: Mutex<Store>,
}

impl FileCookieJar {
    /// Open the jar at `path`, loading any unexpired cookies already stored
    /// there. An unreadable file starts an empty jar.
    pub fn open(path: &Path) -> Self {
        let store = match File::open(path) {
            Ok(file) => cookie_store::serde::json::load(BufReader::new(file)).unwrap_or_else(|e| {
                warn!("Ignoring unreadable cookie jar {}: {}", path.display(), e);
                Store::default()
            }),
            Err(_) => Store::default(),
        };

        Self {
            path: path.to_path_buf(),
            store: Mutex::new(store),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget every cookie and delete the jar file.
    pub fn clear(&self) -> Result<()> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Value of the cookie `name` that would be sent to `url`.
    pub fn get(&self, url: &Url, name: &str) -> Option<String> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_request_values(url)
            .find(|(cookie, _)| *cookie == name)
            .map(|(_, value)| value.to_string())
    }

    fn persist(&self, store: &Store) {
        let written = File::create(&self.path)
            .map_err(cookie_store::Error::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                cookie_store::serde::json::save_incl_expired_and_nonpersistent(store, &mut writer)?;
                writer.flush().map_err(cookie_store::Error::from)
            });

        if let Err(e) = written {
            warn!(
                "Failed to persist cookie jar {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

impl CookieStore for FileCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<RawCookie<'static>> = cookie_headers
            .filter_map(|header| header.to_str().ok())
            .filter_map(|raw| RawCookie::parse(raw.to_string()).ok())
            .collect();
        if cookies.is_empty() {
            return;
        }

        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.store_response_cookies(cookies.into_iter(), url);
        self.persist(&store);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_request_values(url)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            return None;
        }
        HeaderValue::from_str(&header).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn set(jar: &FileCookieJar, at: &str, headers: &[&str]) {
        let values: Vec<HeaderValue> = headers
            .iter()
            .map(|h| HeaderValue::from_str(h).unwrap())
            .collect();
        jar.set_cookies(&mut values.iter(), &url(at));
    }

    fn sent(jar: &FileCookieJar, at: &str) -> Option<String> {
        jar.cookies(&url(at))
            .map(|h| h.to_str().unwrap().to_string())
    }

    #[test]
    fn test_set_and_send_cookies() {
        let dir = tempdir().unwrap();
        let jar = FileCookieJar::open(&dir.path().join("cookies.json"));

        set(
            &jar,
            "http://smush.test/ysmush.it/",
            &["PHPSESSID=abc123; path=/", "lang=en"],
        );

        let header = sent(&jar, "http://smush.test/ysmush.it/ws.php").unwrap();
        let mut pairs: Vec<&str> = header.split("; ").collect();
        pairs.sort();
        assert_eq!(pairs, vec!["PHPSESSID=abc123", "lang=en"]);
        assert!(sent(&jar, "http://other.test/").is_none());
    }

    #[test]
    fn test_max_age_zero_expires_cookie() {
        let dir = tempdir().unwrap();
        let jar = FileCookieJar::open(&dir.path().join("cookies.json"));
        let at = "http://smush.test/ysmush.it/";

        set(&jar, at, &["PHPSESSID=abc123; path=/"]);
        set(
            &jar,
            at,
            &["PHPSESSID=deleted; expires=Thu, 01-Jan-1970 00:00:01 GMT; Max-Age=0; path=/"],
        );

        assert!(sent(&jar, "http://smush.test/ysmush.it/ws.php").is_none());
        assert!(jar.get(&url(at), "PHPSESSID").is_none());
    }

    #[test]
    fn test_path_scoped_cookie_not_sent_elsewhere() {
        let dir = tempdir().unwrap();
        let jar = FileCookieJar::open(&dir.path().join("cookies.json"));

        set(&jar, "http://smush.test/admin/login", &["admin=1; path=/admin"]);

        assert!(sent(&jar, "http://smush.test/ysmush.it/ws.php").is_none());
        assert_eq!(
            sent(&jar, "http://smush.test/admin/panel").as_deref(),
            Some("admin=1")
        );
    }

    #[test]
    fn test_session_cookie_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let at = url("http://smush.test/");

        let jar = FileCookieJar::open(&path);
        set(&jar, "http://smush.test/", &["PHPSESSID=abc123; path=/"]);
        drop(jar);

        let reopened = FileCookieJar::open(&path);
        assert_eq!(reopened.get(&at, "PHPSESSID").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_expired_cookie_not_loaded_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let at = url("http://smush.test/");

        let jar = FileCookieJar::open(&path);
        set(&jar, "http://smush.test/", &["PHPSESSID=abc123; path=/"]);
        set(&jar, "http://smush.test/", &["PHPSESSID=gone; Max-Age=0; path=/"]);
        drop(jar);

        let reopened = FileCookieJar::open(&path);
        assert!(reopened.get(&at, "PHPSESSID").is_none());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let jar = FileCookieJar::open(&path);
        set(&jar, "http://smush.test/", &["PHPSESSID=abc123"]);
        assert!(path.exists());

        jar.clear().unwrap();

        assert!(!path.exists());
        assert!(jar.get(&url("http://smush.test/"), "PHPSESSID").is_none());
        // Clearing twice is harmless.
        jar.clear().unwrap();
    }

    #[test]
    fn test_garbage_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        fs::write(&path, "not a cookie jar").unwrap();

        let jar = FileCookieJar::open(&path);

        assert!(sent(&jar, "http://smush.test/").is_none());
    }
}
