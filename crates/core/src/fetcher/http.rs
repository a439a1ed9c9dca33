//! HTTP transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{FetchError, FetchRequest, FetchedArtifact, Fetcher};
use crate::config::DownloadConfig;

/// Streams a file from a URL to disk.
///
/// Bytes go to a `.part` file that is renamed into place only once the body
/// is complete and its length matches `Content-Length`.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

/// Local file name for a source: the last URL path segment, decoded.
fn artifact_name(request: &FetchRequest) -> String {
    let segment = request
        .source_locator
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .and_then(|s| urlencoding::decode(s).ok())
        .map(|s| s.into_owned());

    sanitize(segment.as_deref().unwrap_or(&request.file_id))
}

pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "artifact".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedArtifact, FetchError> {
        let mut response = self.client.get(&request.source_locator).send().await?;

        let status = response.status();
        if status == 404 || status == 410 {
            return Err(FetchError::NotFound(request.source_locator.clone()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let expected_len = response.content_length();

        tokio::fs::create_dir_all(&request.dest_dir).await?;
        let final_path = request.dest_dir.join(artifact_name(request));
        let temp_path = part_path(&final_path);

        debug!(
            "Fetching {} -> {}",
            request.source_locator,
            final_path.display()
        );

        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected_len {
            if expected != written {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(FetchError::Corrupt(format!(
                    "expected {} bytes, received {}",
                    expected, written
                )));
            }
        }
        if written == 0 {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(FetchError::Corrupt("empty body".to_string()));
        }

        tokio::fs::rename(&temp_path, &final_path).await?;

        Ok(FetchedArtifact {
            path: final_path,
            size_bytes: written,
        })
    }
}
