//! Transfer sources opened from URLs: http(s) via reqwest, file:// via tokio fs.

use std::io;

use reqwest::Url;
use tokio::io::AsyncReadExt;
use xbee_core::{ByteSource, RelayError};

use crate::config::Config;

const FILE_READ_BUF: usize = 8192;

/// HTTP client for transfer sources. The read timeout bounds each wait for body bytes,
/// not the whole transfer, so a slow but live download runs to completion.
pub fn http_client(cfg: &Config) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout())
        .read_timeout(cfg.http_timeout())
        .build()
}

/// Streaming HTTP response body.
pub struct HttpSource {
    response: reqwest::Response,
}

impl ByteSource for HttpSource {
    async fn next_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

pub struct FileSource {
    file: tokio::fs::File,
}

impl ByteSource for FileSource {
    async fn next_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; FILE_READ_BUF];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

pub enum UrlSource {
    Http(HttpSource),
    File(FileSource),
}

impl ByteSource for UrlSource {
    async fn next_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self {
            UrlSource::Http(s) => s.next_bytes().await,
            UrlSource::File(s) => s.next_bytes().await,
        }
    }
}

/// Open `url` and return the source with its declared length (0 when unknown).
/// Open failures surface here so the caller can reject the transfer before it starts.
pub async fn open(client: &reqwest::Client, url: &str) -> Result<(UrlSource, u64), RelayError> {
    let parsed = Url::parse(url).map_err(|e| RelayError::InvalidSource(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => {
            let response = client
                .get(parsed)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| RelayError::SourceReadFailure(e.to_string()))?;
            let len = response.content_length().unwrap_or(0);
            Ok((UrlSource::Http(HttpSource { response }), len))
        }
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| RelayError::InvalidSource(format!("{}: not a local path", url)))?;
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| RelayError::SourceReadFailure(format!("{}: {}", path.display(), e)))?;
            let len = file
                .metadata()
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            Ok((UrlSource::File(FileSource { file }), len))
        }
        other => Err(RelayError::InvalidSource(format!("unsupported scheme {}", other))),
    }
}
