//! Media download proxy
//!
//! Fetches a record's image bytes from an allow-listed host and names the
//! result `apod-<date>.<ext>`. Anything outside the allow-list is rejected
//! before a request is made.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use super::apod::ApodError;
use super::transport::{HttpTransport, Transport};

/// Hosts media may be downloaded from (subdomains included)
pub const ALLOWED_MEDIA_HOSTS: [&str; 3] = ["apod.nasa.gov", "nasa.gov", "i.ytimg.com"];

/// Extensions recognised in media URLs
const MEDIA_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Extension used when the URL doesn't reveal one
const DEFAULT_EXTENSION: &str = "jpg";

/// Content type used when upstream doesn't send one
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Date placeholder used in filenames when the caller has none
const DEFAULT_DATE_LABEL: &str = "image";

/// Default bound on a media download
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloaded media, ready to be written out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDownload {
    /// Synthesized filename, e.g. `apod-2026-02-10.png`
    pub filename: String,
    /// Content type reported by upstream
    pub content_type: String,
    /// Raw media bytes
    pub bytes: Vec<u8>,
}

impl MediaDownload {
    /// Writes the media into `dir` under its synthesized filename
    pub fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Whether the URL's host is one of the allowed hosts or a subdomain of one
pub fn is_allowed_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    ALLOWED_MEDIA_HOSTS
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
}

/// Image extension sniffed from the URL path, `jpg` if none is recognisable
pub fn media_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let path = parsed.path();
            let (_, ext) = path.rsplit_once('.')?;
            let ext = ext.to_ascii_lowercase();
            (!ext.contains('/') && MEDIA_EXTENSIONS.contains(&ext.as_str())).then_some(ext)
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Filename for a download, e.g. `apod-2026-02-10.png`
pub fn media_filename(url: &str, date: &str) -> String {
    format!("apod-{}.{}", date, media_extension(url))
}

/// Downloads media from allow-listed hosts
#[derive(Clone)]
pub struct MediaDownloader {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Default for MediaDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDownloader {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DOWNLOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Downloads `url`, naming the result after `date` (or `image`)
    ///
    /// # Returns
    /// * `Ok(MediaDownload)` with the bytes, content type and filename
    /// * `Err(ApodError::InvalidRequest)` if the URL doesn't parse or isn't http(s)
    /// * `Err(ApodError::DisallowedHost)` if the host isn't allow-listed
    /// * `Err(ApodError::UpstreamHttp)` / `Err(ApodError::Network)` if the fetch fails
    pub async fn download(&self, url: &str, date: Option<&str>) -> Result<MediaDownload, ApodError> {
        let parsed = Url::parse(url)
            .map_err(|e| ApodError::InvalidRequest(format!("invalid media URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApodError::InvalidRequest(format!(
                "unsupported media URL scheme: {}",
                parsed.scheme()
            )));
        }
        if !is_allowed_host(&parsed) {
            return Err(ApodError::DisallowedHost(
                parsed.host_str().unwrap_or_default().to_string(),
            ));
        }

        debug!(url = %parsed, "downloading media");
        let response = match tokio::time::timeout(self.timeout, self.transport.get(&parsed)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(ApodError::Network(err.to_string())),
            Err(_) => {
                return Err(ApodError::Network(format!(
                    "media download timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !response.is_success() {
            return Err(ApodError::UpstreamHttp {
                status: response.status,
                body: format!("failed to fetch media from {}", parsed),
            });
        }

        Ok(MediaDownload {
            filename: media_filename(url, date.unwrap_or(DEFAULT_DATE_LABEL)),
            content_type: response
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            bytes: response.body,
        })
    }
}
