use std::{fs, path::PathBuf, time::Duration};

use log::{info, warn};
use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
    StatusCode, Url,
};

use crate::error::FetchError;

/// A blocking HTTP session shared by every fetch of a job.  Construct it once
/// at startup and pass it to the API clients.
///
/// Successful responses are cached on disk for `expire_after`, transient
/// failures (429 and 5xx, connection errors) are retried with an exponential
/// backoff of `backoff_factor * 2^attempt` seconds.
pub struct HttpSession {
    client: Client,
    cache_dir: Option<PathBuf>,
    expire_after: Duration,
    retries: u32,
    backoff_factor: f64,
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSession {
    pub fn new() -> HttpSession {
        HttpSession {
            client: Client::new(),
            cache_dir: None,
            expire_after: Duration::from_secs(3600),
            retries: 5,
            backoff_factor: 0.2,
        }
    }

    pub fn with_cache(mut self, cache_dir: PathBuf, expire_after: Duration) -> Self {
        self.cache_dir = Some(cache_dir);
        self.expire_after = expire_after;
        self
    }

    pub fn with_retry(mut self, retries: u32, backoff_factor: f64) -> Self {
        self.retries = retries;
        self.backoff_factor = backoff_factor;
        self
    }

    /// Get the body of a GET request.
    ///
    /// Both upstream APIs describe a rejected query in the body of a 400
    /// response, so that body is returned as well and left to the decoder.
    pub fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let url = Url::parse_with_params(url, query)
            .map_err(|e| FetchError::Malformed(format!("invalid url {}: {}", url, e)))?;

        if let Some(body) = self.cached(&url)? {
            info!("Using cached response for {}", url.path());
            return Ok(body);
        }

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .get(url.clone())
                .header(USER_AGENT, "swiss_power/0.1")
                .header(ACCEPT, "*/*")
                .send();
            let retryable = match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::OK || status == StatusCode::BAD_REQUEST {
                        let body = resp.text().map_err(|e| FetchError::Network {
                            url: redact(&url),
                            source: e,
                        })?;
                        if status == StatusCode::OK {
                            self.store(&url, &body)?;
                        }
                        return Ok(body);
                    }
                    if !is_transient(status) || attempt >= self.retries {
                        return Err(match status {
                            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
                                url: redact(&url),
                            },
                            _ => FetchError::HttpStatus {
                                url: redact(&url),
                                status,
                            },
                        });
                    }
                    format!("status {}", status)
                }
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(FetchError::Network {
                            url: redact(&url),
                            source: e,
                        });
                    }
                    e.to_string()
                }
            };
            let wait = self.backoff_factor * 2f64.powi(attempt as i32);
            warn!(
                "Retrying {} after {} (attempt {}/{}, waiting {:.1}s)",
                url.path(),
                retryable,
                attempt + 1,
                self.retries,
                wait
            );
            std::thread::sleep(Duration::from_secs_f64(wait));
            attempt += 1;
        }
    }

    fn cache_path(&self, url: &Url) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{:016x}.body", fnv1a(url.as_str()))))
    }

    fn cached(&self, url: &Url) -> Result<Option<String>, FetchError> {
        let Some(path) = self.cache_path(url) else {
            return Ok(None);
        };
        let fresh = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age < self.expire_after)
                .unwrap_or(false),
            Err(_) => false,
        };
        if !fresh {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| FetchError::Cache(path, e))
    }

    fn store(&self, url: &Url, body: &str) -> Result<(), FetchError> {
        let Some(path) = self.cache_path(url) else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| FetchError::Cache(dir.to_path_buf(), e))?;
        }
        fs::write(&path, body).map_err(|e| FetchError::Cache(path, e))
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// 64-bit FNV-1a.  Cache file names must not change between builds, which
/// rules out the std `DefaultHasher`.
fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Drop the query string, it may carry an API token.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn cache_round_trip() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let session =
            HttpSession::new().with_cache(dir.path().to_path_buf(), Duration::from_secs(60));
        let url = Url::parse("https://example.com/api?a=1")?;
        assert_eq!(session.cached(&url)?, None);
        session.store(&url, "<xml/>")?;
        assert_eq!(session.cached(&url)?, Some("<xml/>".to_string()));

        let other = Url::parse("https://example.com/api?a=2")?;
        assert_eq!(session.cached(&other)?, None);
        Ok(())
    }

    #[test]
    fn cache_file_name_is_stable() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let session =
            HttpSession::new().with_cache(dir.path().to_path_buf(), Duration::from_secs(60));
        let url = Url::parse("https://example.com/api?a=1")?;
        assert_eq!(
            session.cache_path(&url),
            Some(dir.path().join("023ab04f76a3980a.body"))
        );
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(HttpSession::new().cache_path(&url), None);
        Ok(())
    }

    #[test]
    fn expired_cache_is_ignored() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let session = HttpSession::new().with_cache(dir.path().to_path_buf(), Duration::ZERO);
        let url = Url::parse("https://example.com/api")?;
        session.store(&url, "stale")?;
        assert_eq!(session.cached(&url)?, None);
        Ok(())
    }

    #[test]
    fn token_is_not_leaked() -> Result<(), Box<dyn Error>> {
        let url = Url::parse("https://web-api.tp.entsoe.eu/api?securityToken=secret")?;
        assert_eq!(redact(&url), "https://web-api.tp.entsoe.eu/api");
        Ok(())
    }
}
