use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::ManifestError;

/// Supported manifest formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    M3u,
    Pls,
}

impl ManifestFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ManifestFormat::M3u => "m3u",
            ManifestFormat::Pls => "pls",
        }
    }

    /// Detect the format from anywhere in the URL; `m3u` wins over `pls`
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        if lower.contains("m3u") {
            Some(ManifestFormat::M3u)
        } else if lower.contains("pls") {
            Some(ManifestFormat::Pls)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ManifestFormat::M3u => "audio/x-mpegurl",
            ManifestFormat::Pls => "audio/x-scpls",
        }
    }

    pub fn parse<R: Read>(&self, reader: R) -> Result<Vec<String>, ManifestError> {
        match self {
            ManifestFormat::M3u => parse_m3u(reader),
            ManifestFormat::Pls => parse_pls(reader),
        }
    }
}

/// Substring heuristic used to decide whether a URL names a manifest
pub fn is_manifest_url<S: AsRef<str>>(url: &str, extensions: &[S]) -> bool {
    let lower = url.to_lowercase();
    extensions
        .iter()
        .map(|ext| ext.as_ref())
        .filter(|ext| !ext.is_empty())
        .any(|ext| lower.contains(&ext.to_lowercase()))
}

/// One URL per line; blank lines, `#` comments and `<` markup are skipped
pub fn parse_m3u<R: Read>(reader: R) -> Result<Vec<String>, ManifestError> {
    let mut urls = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('<') {
            continue;
        }
        urls.push(line.to_string());
    }
    Ok(urls)
}

/// `FileN=` entries ordered by N; titles and lengths are ignored
pub fn parse_pls<R: Read>(reader: R) -> Result<Vec<String>, ManifestError> {
    let mut entries: Vec<(usize, String)> = Vec::new();

    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();

        if let Some(file_line) = line.strip_prefix("File") {
            if let Some((number, url)) = file_line.split_once('=') {
                if let Ok(number) = number.trim().parse::<usize>() {
                    let url = url.trim();
                    if !url.is_empty() {
                        entries.push((number, url.to_string()));
                    }
                }
            }
        }
    }

    entries.sort_by_key(|(number, _)| *number);
    Ok(entries.into_iter().map(|(_, url)| url).collect())
}

/// Turns a manifest URL into the media URLs it lists
#[async_trait]
pub trait ManifestResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<Vec<String>, ManifestError>;
}

/// Downloads the manifest body to a temporary file before parsing it
pub struct HttpManifestResolver {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl HttpManifestResolver {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self::with_client(reqwest::Client::new(), cache_dir)
    }

    pub fn with_client(client: reqwest::Client, cache_dir: PathBuf) -> Self {
        Self { client, cache_dir }
    }
}

#[async_trait]
impl ManifestResolver for HttpManifestResolver {
    async fn resolve(&self, url: &str) -> Result<Vec<String>, ManifestError> {
        let format = ManifestFormat::from_url(url)
            .ok_or_else(|| ManifestError::Unsupported(url.to_string()))?;

        debug!("Downloading {} manifest from {}", format.extension(), url);
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let cache_dir = self.cache_dir.clone();
        let urls = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ManifestError> {
            std::fs::create_dir_all(&cache_dir)?;
            let mut file = NamedTempFile::new_in(&cache_dir)?;
            file.write_all(&body)?;
            file.flush()?;
            format.parse(file.reopen()?)
        })
        .await
        .map_err(|e| ManifestError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        if urls.is_empty() {
            return Err(ManifestError::Empty {
                url: url.to_string(),
            });
        }
        info!("Manifest {} lists {} entries", url, urls.len());
        Ok(urls)
    }
}
