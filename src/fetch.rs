//! Credentialed, resumable downloads of Sentinel-1 granules.
//!
//! Partially fetched files are kept next to the target with a `.partial`
//! suffix and resumed with a byte-range request on the next attempt.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tracing::info;
use url::Url;

use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};

const ASF_DATAPOOL_URL: &str = "https://datapool.asf.alaska.edu";

/// Download URL of a Sentinel-1 SLC granule in the ASF datapool.
pub fn granule_download_url(granule: &str) -> Result<Url> {
    let platform = match granule.get(0..3) {
        Some(p @ ("S1A" | "S1B" | "S1C")) => p,
        _ => {
            return Err(Error::Argument(format!(
                "not a Sentinel-1 granule: {granule}"
            )))
        }
    };
    let unit = &platform[2..3];
    Url::parse(&format!("{ASF_DATAPOOL_URL}/SLC/S{unit}/{granule}.zip"))
        .map_err(|e| Error::Download(format!("bad download URL for {granule}: {e}")))
}

/// Fetch a granule zip into `workdir` using Earthdata credentials. Returns
/// the local path; an already complete file is not fetched again.
pub async fn download_granule(
    client: &reqwest::Client,
    credentials: &CredentialBundle,
    granule: &str,
    workdir: &Path,
) -> Result<PathBuf> {
    let url = granule_download_url(granule)?;
    let output = workdir.join(format!("{granule}.zip"));
    let auth = (
        credentials.earthdata_username.as_str(),
        credentials.earthdata_password.as_str(),
    );
    download_file(client, &url, &output, Some(auth)).await?;
    Ok(output)
}

/// Resumable download of `url` into `output`, with optional basic auth.
pub async fn download_file(
    client: &reqwest::Client,
    url: &Url,
    output: &Path,
    auth: Option<(&str, &str)>,
) -> Result<()> {
    if output.exists() {
        info!(path = %output.display(), "output file already exists");
        return Ok(());
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial = partial_path(output);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    let mut head = client.head(url.clone());
    if let Some((user, password)) = auth {
        head = head.basic_auth(user, Some(password));
    }
    let head = head.send().await?.error_for_status()?;
    let total_size = head
        .content_length()
        .ok_or_else(|| Error::Download(format!("no content length reported for {url}")))?;

    let progress = (byte_count as f64 / total_size as f64) * 100.;
    if progress > 0.0 {
        info!("resuming download from {progress:.2}% completion");
    }

    if byte_count < total_size {
        info!(url = %url, "downloading");
        let mut request = client
            .get(url.clone())
            .header("Range", format!("bytes={}-{}", byte_count, total_size - 1));
        if let Some((user, password)) = auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?.error_for_status()?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            partial_file.write_all(&bytes)?;
            byte_count += bytes.len() as u64;
        }
    }

    if byte_count != total_size {
        return Err(Error::Download(format!(
            "{url}: expected {total_size} bytes, got {byte_count}"
        )));
    }

    info!(path = %output.display(), "download complete");
    std::fs::rename(partial, output)?;

    Ok(())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_asf_datapool_urls() {
        let granule = "S1B_IW_SLC__1SDV_20200709T113021_20200709T113048_022366_02A7EC_9FF7";
        assert_eq!(
            granule_download_url(granule).unwrap().as_str(),
            format!("{ASF_DATAPOOL_URL}/SLC/SB/{granule}.zip")
        );
    }

    #[test]
    fn rejects_non_sentinel1_granules() {
        assert!(granule_download_url("S2A_MSIL1C_20160805T155912").is_err());
        assert!(granule_download_url("S1").is_err());
    }

    #[test]
    fn partial_files_sit_next_to_the_target() {
        assert_eq!(
            partial_path(Path::new("/work/granule.zip")),
            PathBuf::from("/work/granule.zip.partial")
        );
    }
}
