//! HTTP status classification for the three WebDAV requests we issue.
//!
//! Server quirks live here and nowhere else.

use reqwest::StatusCode;

/// Which request produced the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavRequest {
    /// `PROPFIND` with `Depth: 0` on a collection
    Probe,
    /// `PROPFIND` with `Depth: 0` on an uploaded object
    Verify,
    /// `MKCOL`
    MakeCollection,
    /// `PUT`
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// The resource is there (or the collection already existed)
    Exists,
    /// The request created the resource
    Created,
    NotFound,
    /// Worth another attempt
    Retryable,
    Fatal,
}

pub fn classify(request: DavRequest, status: StatusCode) -> StatusClass {
    let code = status.as_u16();
    match request {
        DavRequest::Probe => match code {
            200 | 207 => StatusClass::Exists,
            // Collection probed without trailing slash. The redirect is not
            // followed; a PUT into a collection that is not really there fails.
            301 => StatusClass::Exists,
            404 => StatusClass::NotFound,
            _ if is_transient(status) => StatusClass::Retryable,
            _ => StatusClass::Fatal,
        },
        DavRequest::Verify => match code {
            // only a direct answer about the object itself counts
            200 | 207 => StatusClass::Exists,
            404 => StatusClass::NotFound,
            _ if is_transient(status) => StatusClass::Retryable,
            _ => StatusClass::Fatal,
        },
        DavRequest::MakeCollection => match code {
            201 => StatusClass::Created,
            // 405 is the RFC 4918 answer for an existing collection. Some
            // servers redirect to the slash form instead; as with probes,
            // the upload into the collection is what proves it exists.
            405 | 301 => StatusClass::Exists,
            _ if is_transient(status) => StatusClass::Retryable,
            _ => StatusClass::Fatal,
        },
        DavRequest::Upload => match code {
            200 | 201 | 204 => StatusClass::Created,
            _ => StatusClass::Retryable,
        },
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Anything that lets the provisioner move on to the next segment.
pub fn is_ready(class: StatusClass) -> bool {
    matches!(class, StatusClass::Exists | StatusClass::Created)
}
