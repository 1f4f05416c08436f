//! Object store configuration for S3 and local filesystem access.
//!
//! Requests are never retried: a batch run reports the first failure and stops.

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
///
/// # Errors
/// Returns an error if the URI is malformed (missing scheme, bucket, or key).
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(60))
}

fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        backoff: object_store::BackoffConfig::default(),
        retry_timeout: Duration::from_secs(60),
    }
}

/// Create an S3 client for reading rasters.
///
/// Credentials and region are loaded from the environment
/// (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION, instance profile).
fn create_s3_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config());

    Ok(Arc::new(builder.build()?))
}

/// Create the store behind a raster root and the key prefix inside it.
///
/// `root` is either `s3://bucket/prefix` or a local directory, which must exist.
pub fn create_raster_store(root: &str) -> Result<(Arc<dyn ObjectStore>, String)> {
    if root.starts_with("s3://") {
        let (bucket, key) = parse_s3_uri(root)?;
        let store = create_s3_store(bucket)?;
        return Ok((store, key.trim_matches('/').to_string()));
    }

    let path = std::path::Path::new(root);
    if !path.is_dir() {
        anyhow::bail!("Raster store directory does not exist: {}", path.display());
    }
    tracing::info!("Creating LocalFileSystem store at: {}", path.display());
    let store = LocalFileSystem::new_with_prefix(path)
        .with_context(|| format!("Failed to open raster store at {}", path.display()))?;
    Ok((Arc::new(store), String::new()))
}

/// Join a store prefix and relative parts into an object path.
pub fn object_path(prefix: &str, parts: &[&str]) -> Path {
    let joined = std::iter::once(prefix)
        .chain(parts.iter().copied())
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    Path::from(joined)
}
