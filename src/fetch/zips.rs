use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use url::Url;

/// Cache location for `url_str`: `cache_dir/<last path segment>`.
pub fn cache_path(url_str: &str, cache_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let url = Url::parse(url_str).with_context(|| format!("parsing URL {}", url_str))?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.zip");
    Ok(cache_dir.as_ref().join(filename))
}

/// Return the cached copy of `url_str`, downloading it first if it is not
/// cached yet. Cached files are never revalidated.
pub async fn download_cached(
    client: &Client,
    url_str: &str,
    cache_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let dest_path = cache_path(url_str, &cache_dir)?;
    if fs::try_exists(&dest_path).await.unwrap_or(false) {
        info!(path = %dest_path.display(), "using cached download");
        return Ok(dest_path);
    }

    fs::create_dir_all(cache_dir.as_ref())
        .await
        .with_context(|| format!("creating cache dir {}", cache_dir.as_ref().display()))?;

    info!(url = url_str, "downloading");
    let resp = client
        .get(url_str)
        .send()
        .await
        .with_context(|| format!("GET {}", url_str))?
        .error_for_status()?;
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("reading body from {}", url_str))?;

    // a partial download must never look like a cache hit
    let mut tmp_path = dest_path.clone().into_os_string();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    fs::write(&tmp_path, &bytes)
        .await
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &dest_path)
        .await
        .with_context(|| format!("renaming into {}", dest_path.display()))?;

    info!(path = %dest_path.display(), kb = bytes.len() / 1024, "downloaded");
    Ok(dest_path)
}
