//! Chunked multipart upload over pre-signed URLs
//!
//! Protocol: start-upload names the file and yields an upload id + object
//! key; signed-urls hands back one PUT target per chunk; chunks go up in
//! parallel; complete-upload receives the 1-indexed part numbers in order
//! with their ETags, quotes stripped.

use std::path::Path;

use bytes::Bytes;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::client::{CompletedPart, EditorClient};
use crate::error::{Error, Result};

/// Default chunk size: 20 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// One planned chunk of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-indexed part number, submitted in generation order.
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Split `total` bytes into chunks of `chunk_size`, last chunk short.
/// An empty payload still produces one empty part so the completion call has
/// something to finalize.
pub fn plan_parts(total: u64, chunk_size: u64) -> Vec<PartPlan> {
    assert!(chunk_size > 0, "chunk size must be positive");
    if total == 0 {
        return vec![PartPlan {
            number: 1,
            offset: 0,
            len: 0,
        }];
    }
    let mut parts = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = chunk_size.min(total - offset);
        parts.push(PartPlan {
            number: parts.len() as u32 + 1,
            offset,
            len,
        });
        offset += len;
    }
    parts
}

/// Strip the surrounding quote characters S3-style backends put on ETags.
pub fn strip_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Uploads files through the signed-URL protocol.
pub struct Uploader {
    http: reqwest::Client,
    chunk_size: u64,
}

impl Uploader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    /// Upload a file from disk; returns the object key for the import call.
    pub async fn upload_file(&self, client: &EditorClient, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Upload(format!("unusable file name: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        self.upload_bytes(client, &file_name, Bytes::from(data)).await
    }

    /// Upload an in-memory payload; returns the object key.
    pub async fn upload_bytes(
        &self,
        client: &EditorClient,
        file_name: &str,
        data: Bytes,
    ) -> Result<String> {
        let ticket = client.start_upload(file_name).await?;
        let parts = plan_parts(data.len() as u64, self.chunk_size);
        info!(
            file_name,
            key = %ticket.key,
            parts = parts.len(),
            bytes = data.len(),
            "starting chunked upload"
        );

        let urls = client
            .signed_urls(&ticket.upload_id, &ticket.key, parts.len() as u32)
            .await?;
        if urls.len() != parts.len() {
            return Err(Error::Upload(format!(
                "asked for {} signed urls, got {}",
                parts.len(),
                urls.len()
            )));
        }

        // PUT every chunk concurrently; try_join_all keeps results in part
        // order, which the completion call requires.
        let puts = parts.iter().zip(&urls).map(|(part, url)| {
            let chunk = data.slice(part.offset as usize..(part.offset + part.len) as usize);
            let http = &self.http;
            let number = part.number;
            async move {
                debug!(number, len = chunk.len(), "uploading part");
                let response = http
                    .put(url)
                    .body(chunk)
                    .send()
                    .await?
                    .error_for_status()?;
                let etag = response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::Upload(format!("no ETag for part {number}")))?;
                Ok::<CompletedPart, Error>(CompletedPart {
                    part_number: number,
                    etag: strip_etag(etag),
                })
            }
        });
        let completed = try_join_all(puts).await?;

        client
            .complete_upload(&ticket.upload_id, &ticket.key, completed)
            .await?;
        info!(key = %ticket.key, "upload complete");
        Ok(ticket.key)
    }
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch a build artifact and return its size and sha256, for scenarios
/// asserting on downloaded output without keeping the bytes around.
pub async fn fetch_and_checksum(http: &reqwest::Client, url: &str) -> Result<(u64, String)> {
    let body = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    let digest = Sha256::digest(&body);
    Ok((body.len() as u64, hex::encode(digest)))
}
