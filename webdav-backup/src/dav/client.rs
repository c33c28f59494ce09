//! Authenticated WebDAV requests over a shared `reqwest` client.

use super::netrc::{Credentials, Netrc};
use crate::transfer::{format_bytes, format_rate, ProgressCallback, ProgressStream};
use crate::utils::errors::{BackupError, Result};
use quick_xml::de::from_str;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
  </D:prop>
</D:propfind>"#;

/// Upload progress is logged at most this often.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Longest response body kept for error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: None,
        }
    }
}

/// Status plus whatever body could be read.
#[derive(Debug)]
pub struct DavResponse {
    pub status: StatusCode,
    /// `None` when the connection died while reading the body
    pub body: Option<String>,
}

impl DavResponse {
    async fn read(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                // Servers that close the connection early on metadata
                // queries still sent a usable status line.
                debug!("Response body unreadable after HTTP {}: {}", status, e);
                None
            }
        };
        Self { status, body }
    }

    /// Truncated body for error messages.
    pub fn body_excerpt(&self) -> String {
        let body = self.body.as_deref().unwrap_or("<body unavailable>").trim();
        match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DavClient {
    http: reqwest::Client,
    netrc: Arc<Netrc>,
}

impl DavClient {
    pub fn new(settings: &ClientSettings, netrc: Netrc) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("webdav-backup/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BackupError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            netrc: Arc::new(netrc),
        })
    }

    fn credentials_for(&self, url: &str) -> Option<&Credentials> {
        let url = reqwest::Url::parse(url).ok()?;
        self.netrc.lookup(url.host_str()?)
    }

    /// Whether requests to `url` will carry credentials.
    pub fn has_credentials(&self, url: &str) -> bool {
        self.credentials_for(url).is_some()
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.credentials_for(url) {
            Some(creds) => builder.basic_auth(&creds.login, Some(&creds.password)),
            None => builder,
        }
    }

    fn transport(url: &str, source: reqwest::Error) -> BackupError {
        BackupError::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// `PROPFIND` with `Depth: 0`.
    pub async fn probe(&self, url: &str) -> Result<DavResponse> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| BackupError::Config(e.to_string()))?;
        let response = self
            .request(method, url)
            .header("Depth", "0")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;
        let response = DavResponse::read(response).await;
        debug!("PROPFIND {} -> {}", url, response.status);
        Ok(response)
    }

    /// `MKCOL`.
    pub async fn make_collection(&self, url: &str) -> Result<DavResponse> {
        let method = Method::from_bytes(b"MKCOL").map_err(|e| BackupError::Config(e.to_string()))?;
        let response = self
            .request(method, url)
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;
        let response = DavResponse::read(response).await;
        debug!("MKCOL {} -> {}", url, response.status);
        Ok(response)
    }

    /// `PUT` the file at `local` to `url`, streaming it from disk.
    pub async fn put_file(&self, url: &str, local: &Path) -> Result<DavResponse> {
        let file = tokio::fs::File::open(local).await?;
        let size = file.metadata().await?.len();

        let label = url.to_string();
        let callback: ProgressCallback = Arc::new(move |progress| {
            if !progress.finished {
                debug!(
                    "{}: {} of {} sent ({})",
                    label,
                    format_bytes(progress.bytes_sent),
                    format_bytes(progress.total_bytes),
                    format_rate(progress.bytes_per_second())
                );
            }
        });
        let stream = ProgressStream::new(ReaderStream::new(file), size, PROGRESS_INTERVAL, callback);

        let response = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;
        let response = DavResponse::read(response).await;
        debug!("PUT {} ({}) -> {}", url, format_bytes(size), response.status);
        Ok(response)
    }
}

/// Short description of why a request never got a response.
pub fn describe_transport(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_request() {
        "transfer interrupted"
    } else {
        "transport error"
    }
}

/// `<multistatus>` as returned by `PROPFIND`. Element names are matched
/// without their namespace prefix.
#[derive(Debug, Default, Deserialize)]
struct Multistatus {
    #[serde(rename = "response", default)]
    responses: Vec<PropfindResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct PropfindResponse {
    #[serde(rename = "propstat", default)]
    propstats: Vec<Propstat>,
}

#[derive(Debug, Default, Deserialize)]
struct Propstat {
    #[serde(default)]
    prop: Prop,
    /// `HTTP/1.1 200 OK`
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct Prop {
    #[serde(default)]
    getcontentlength: Option<String>,
}

impl Propstat {
    fn is_ok(&self) -> bool {
        self.status.split_whitespace().nth(1) == Some("200")
    }
}

/// `getcontentlength` from the successful propstat of a PROPFIND
/// multistatus body. `None` when the body is not a multistatus or the
/// server did not report a size.
pub fn content_length(body: &str) -> Option<u64> {
    let multistatus: Multistatus = match from_str(body) {
        Ok(multistatus) => multistatus,
        Err(e) => {
            debug!("Unparseable multistatus body: {}", e);
            return None;
        }
    };
    multistatus
        .responses
        .iter()
        .flat_map(|response| &response.propstats)
        .filter(|propstat| propstat.is_ok())
        .find_map(|propstat| propstat.prop.getcontentlength.as_deref()?.trim().parse().ok())
}
