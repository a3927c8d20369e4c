//! S3 uploader.
//!
//! Stores sealed archives with a SigV4-signed `PutObject`. Works against AWS
//! or any S3-compatible endpoint (MinIO, LocalStack) via `s3_endpoint`.
//!
//! # Addressing
//!
//! | Configuration | URL |
//! |---------------|-----|
//! | default | `https://<bucket>.s3.<region>.amazonaws.com/<key>` |
//! | `path_style = true` | `https://s3.<region>.amazonaws.com/<bucket>/<key>` |
//! | `s3_endpoint` + `path_style = true` | `<endpoint>/<bucket>/<key>` |
//! | `s3_endpoint` + `path_style = false` | `<scheme>://<bucket>.<endpoint host>/<key>` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::archive::ObjectKey;
use crate::aws::{self, AwsCredentials, SigningRequest};
use crate::traits::ObjectStore;

const CONTENT_TYPE: &str = "application/gzip";

/// Where and how objects are addressed.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
}

/// [`ObjectStore`] writing to S3.
pub struct S3Uploader {
    client: reqwest::Client,
    creds: AwsCredentials,
    settings: S3Settings,
}

/// Host header value and full URL for one object.
#[derive(Debug, PartialEq, Eq)]
struct ObjectAddress {
    host: String,
    canonical_uri: String,
    url: String,
}

impl S3Uploader {
    pub fn new(creds: AwsCredentials, settings: S3Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            creds,
            settings,
        }
    }

    fn address(&self, bucket: &str, key: &ObjectKey) -> ObjectAddress {
        object_address(&self.settings, bucket, key.as_str())
    }
}

fn object_address(settings: &S3Settings, bucket: &str, key: &str) -> ObjectAddress {
    let encoded_key = aws::uri_encode_path(key);

    let (base, host, path_style) = match settings.endpoint {
        Some(ref endpoint) => (
            aws::endpoint_base_url(endpoint),
            aws::endpoint_host(endpoint),
            settings.path_style,
        ),
        None if settings.path_style => {
            let host = format!("s3.{}.amazonaws.com", settings.region);
            (format!("https://{}", host), host, true)
        }
        None => {
            let host = format!("{}.s3.{}.amazonaws.com", bucket, settings.region);
            (format!("https://{}", host), host, false)
        }
    };

    if path_style {
        let canonical_uri = format!("/{}/{}", aws::uri_encode(bucket), encoded_key);
        ObjectAddress {
            url: format!("{}{}", base, canonical_uri),
            host,
            canonical_uri,
        }
    } else if settings.endpoint.is_some() {
        let scheme = if base.starts_with("http://") { "http" } else { "https" };
        let host = format!("{}.{}", bucket, host);
        let canonical_uri = format!("/{}", encoded_key);
        ObjectAddress {
            url: format!("{}://{}{}", scheme, host, canonical_uri),
            host,
            canonical_uri,
        }
    } else {
        let canonical_uri = format!("/{}", encoded_key);
        ObjectAddress {
            url: format!("{}{}", base, canonical_uri),
            host,
            canonical_uri,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Uploader {
    fn kind(&self) -> &str {
        "s3"
    }

    async fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<String> {
        let address = self.address(bucket, key);
        let signed = aws::sign(
            &self.creds,
            &SigningRequest {
                method: "PUT",
                host: &address.host,
                canonical_uri: &address.canonical_uri,
                canonical_query: "",
                headers: &[("content-type", CONTENT_TYPE)],
                payload: &body,
                region: &self.settings.region,
                service: "s3",
            },
            Utc::now(),
        );

        let mut req_builder = self.client.put(&address.url).body(body);
        for (name, value) in &signed.headers {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        tracing::debug!(bucket, key = %key, "uploaded archive");
        Ok(format!("s3://{}/{}", bucket, key))
    }
}
