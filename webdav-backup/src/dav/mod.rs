//! WebDAV side of the pipeline: credentials, requests, provisioning, upload.

pub mod client;
pub mod netrc;
pub mod provision;
pub mod status;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_server;

pub use client::{ClientSettings, DavClient, DavResponse};
pub use netrc::{Credentials, Netrc};
pub use provision::RemoteDirectoryProvisioner;
pub use status::{classify, DavRequest, StatusClass};
pub use upload::{RetryPolicy, UploadSession};
