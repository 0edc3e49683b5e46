//! Source image resolution: turns an [`ImageSource`] into encoded bytes.

use std::io::Read;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;

use crate::{Error, ImageSource, InputLimits, Result, ServiceConfig};

/// Fetches source images over HTTP(S) or from `file://` URLs
pub struct SourceResolver {
    client: Client,
    limits: InputLimits,
}

impl SourceResolver {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.source_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, limits: config.limits })
    }

    /// Encoded bytes of `source`, capped at `max_input_bytes`.
    ///
    /// Unreachable sources are `SourceUnavailable`; oversized ones are
    /// `InvalidInput`.
    pub fn resolve(&self, source: &ImageSource) -> Result<Vec<u8>> {
        match source {
            ImageSource::Bytes(b) => {
                self.check_size(b.len() as u64)?;
                Ok(b.clone())
            }
            ImageSource::Url(raw) => {
                let url = url::Url::parse(raw)
                    .map_err(|e| Error::SourceUnavailable(format!("bad image URL '{}': {}", raw, e)))?;
                match url.scheme() {
                    "http" | "https" => self.fetch_http(url),
                    "file" => self.read_file(&url),
                    other => Err(Error::SourceUnavailable(format!("unsupported URL scheme '{}'", other))),
                }
            }
        }
    }

    fn check_size(&self, len: u64) -> Result<()> {
        if len > self.limits.max_input_bytes {
            return Err(Error::InvalidInput(format!(
                "input is {} bytes, limit is {}",
                len, self.limits.max_input_bytes
            )));
        }
        Ok(())
    }

    fn fetch_http(&self, url: url::Url) -> Result<Vec<u8>> {
        debug!("fetching source {}", url);
        let res = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| Error::SourceUnavailable(format!("HTTP GET {} failed: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(Error::SourceUnavailable(format!("HTTP GET {} returned {}", url, res.status())));
        }
        if let Some(len) = res.content_length() {
            self.check_size(len)?;
        }

        // read at most one byte past the limit so a lying Content-Length is caught
        let mut body = Vec::new();
        res.take(self.limits.max_input_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| Error::SourceUnavailable(format!("Failed to read {}: {}", url, e)))?;
        self.check_size(body.len() as u64)?;
        Ok(body)
    }

    fn read_file(&self, url: &url::Url) -> Result<Vec<u8>> {
        let path = url
            .to_file_path()
            .map_err(|_| Error::SourceUnavailable(format!("not a local file URL: {}", url)))?;
        let meta = std::fs::metadata(&path)
            .map_err(|e| Error::SourceUnavailable(format!("cannot read {}: {}", path.display(), e)))?;
        self.check_size(meta.len())?;
        std::fs::read(&path).map_err(|e| Error::SourceUnavailable(format!("cannot read {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(max_input_bytes: u64) -> SourceResolver {
        let cfg = ServiceConfig {
            limits: InputLimits { max_input_bytes, ..Default::default() },
            ..Default::default()
        };
        SourceResolver::new(&cfg).unwrap()
    }

    #[test]
    fn inline_bytes_pass_through() {
        let r = resolver(10);
        assert_eq!(r.resolve(&ImageSource::Bytes(vec![1, 2, 3])).unwrap(), vec![1, 2, 3]);
        assert!(matches!(r.resolve(&ImageSource::Bytes(vec![0; 11])), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn file_urls_are_read_from_disk() {
        let path = std::env::temp_dir().join(format!("rfvector-source-{}.bin", std::process::id()));
        std::fs::write(&path, b"abcdef").unwrap();
        let url = url::Url::from_file_path(&path).unwrap().to_string();

        assert_eq!(resolver(100).resolve(&ImageSource::Url(url.clone())).unwrap(), b"abcdef");
        assert!(matches!(resolver(3).resolve(&ImageSource::Url(url)), Err(Error::InvalidInput(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unreachable_sources_are_source_unavailable() {
        let r = resolver(100);
        for bad in ["ftp://example.com/a.png", "not a url", "file:///definitely/missing/a.png"] {
            let err = r.resolve(&ImageSource::Url(bad.into())).unwrap_err();
            assert!(matches!(err, Error::SourceUnavailable(_)), "{}: {:?}", bad, err);
        }
    }
}
