//! Optional packaging and upload of final products to S3.
//!
//! When no bucket is requested this module is a strict no-op: no client is
//! constructed and no network call is made. When a bucket is requested, the
//! final artifact set is bundled into a single compressed archive and both
//! the bundle and the individual files are uploaded; nothing is uploaded
//! until cloud credentials have been verified.
use std::fs::File;
use std::path::{Path, PathBuf};

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::ProvideCredentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    pub prefix: String,
}

/// Publish the artifact set to the upload target, or do nothing when no
/// target was requested.
pub async fn publish(
    outputs: &[PathBuf],
    target: Option<&UploadTarget>,
    workdir: &Path,
) -> Result<()> {
    let Some(target) = target else {
        info!("no bucket requested; products stay in the working directory");
        return Ok(());
    };
    if outputs.is_empty() {
        warn!("nothing to publish");
        return Ok(());
    }

    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    ensure_cloud_credentials(&config).await?;
    let client = Client::new(&config);

    let archive = bundle(outputs, workdir)?;
    for path in outputs.iter().chain(std::iter::once(&archive)) {
        upload_file(&client, target, path).await?;
    }
    Ok(())
}

/// Fail before any upload when no AWS credentials can be resolved.
async fn ensure_cloud_credentials(config: &SdkConfig) -> Result<()> {
    let provider = config.credentials_provider().ok_or_else(|| {
        Error::Upload("a bucket was requested but no AWS credentials are configured".to_string())
    })?;
    provider.provide_credentials().await.map_err(|e| {
        Error::Upload(format!(
            "a bucket was requested but AWS credentials could not be resolved: {e}"
        ))
    })?;
    Ok(())
}

/// Pack the artifact set into one `.tar.gz` bundle named after the primary
/// product, written next to the products.
pub fn bundle(outputs: &[PathBuf], workdir: &Path) -> Result<PathBuf> {
    let stem = outputs
        .first()
        .and_then(|path| path.file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or("products");
    let path = workdir.join(format!("{stem}.tar.gz"));

    let file = File::create(&path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for output in outputs {
        let name = output.file_name().ok_or_else(|| {
            Error::Upload(format!("unnamed output file: {}", output.display()))
        })?;
        builder.append_path_with_name(output, name)?;
    }
    builder.into_inner()?.finish()?;

    Ok(path)
}

async fn upload_file(client: &Client, target: &UploadTarget, path: &Path) -> Result<()> {
    let key = object_key(&target.prefix, path)?;
    info!(bucket = %target.bucket, key = %key, "uploading");

    let body = ByteStream::from_path(path)
        .await
        .map_err(|e| Error::Upload(format!("reading {}: {e}", path.display())))?;

    client
        .put_object()
        .bucket(&target.bucket)
        .key(&key)
        .content_type(content_type(path))
        .body(body)
        .send()
        .await
        .map_err(|e| Error::Upload(format!("uploading {}: {e}", path.display())))?;
    Ok(())
}

fn object_key(prefix: &str, path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Upload(format!("unnamed output file: {}", path.display())))?;
    if prefix.is_empty() {
        Ok(name.to_string())
    } else {
        Ok(format!("{}/{name}", prefix.trim_end_matches('/')))
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("nc") => "application/x-netcdf",
        Some("png") => "image/png",
        Some("tif" | "tiff") => "image/tiff",
        Some("gz") => "application/gzip",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn object_keys_respect_the_prefix() {
        let path = Path::new("/work/velocity.nc");
        assert_eq!(object_key("", path).unwrap(), "velocity.nc");
        assert_eq!(object_key("jobs/123", path).unwrap(), "jobs/123/velocity.nc");
        assert_eq!(object_key("jobs/123/", path).unwrap(), "jobs/123/velocity.nc");
    }

    #[test]
    fn content_types_cover_the_product_set() {
        assert_eq!(content_type(Path::new("a.nc")), "application/x-netcdf");
        assert_eq!(content_type(Path::new("a.png")), "image/png");
        assert_eq!(content_type(Path::new("a.tar.gz")), "application/gzip");
        assert_eq!(content_type(Path::new("a.dat")), "application/octet-stream");
    }

    #[test]
    fn bundle_contains_every_final_file() {
        let workdir = tempfile::tempdir().unwrap();
        let product = workdir.path().join("velocity.nc");
        let browse = workdir.path().join("velocity.png");
        std::fs::write(&product, b"netcdf bytes").unwrap();
        std::fs::write(&browse, b"png bytes").unwrap();

        let archive = bundle(&[product, browse], workdir.path()).unwrap();
        assert_eq!(
            archive.file_name().unwrap().to_str().unwrap(),
            "velocity.tar.gz"
        );

        let decoder = GzDecoder::new(File::open(&archive).unwrap());
        let mut tar = tar::Archive::new(decoder);
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        assert_eq!(names, ["velocity.nc", "velocity.png"]);
    }

    #[tokio::test]
    async fn missing_cloud_credentials_fail_before_any_upload() {
        let config = SdkConfig::builder().build();
        let err = ensure_cloud_credentials(&config).await.unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
    }

    #[tokio::test]
    async fn publish_without_a_bucket_is_a_no_op() {
        let workdir = tempfile::tempdir().unwrap();
        let product = workdir.path().join("velocity.nc");
        std::fs::write(&product, b"x").unwrap();

        publish(&[product.clone()], None, workdir.path())
            .await
            .unwrap();

        // no archive was built and the product stays where it was
        assert!(product.exists());
        assert!(!workdir.path().join("velocity.tar.gz").exists());
    }
}
