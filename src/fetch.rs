use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::ProvisionError;
use crate::fs_util;
use crate::secret::Secret;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const KEY_FILE_MODE: u32 = 0o600;

/// Validates a remote key URL before any network activity.
///
/// # Errors
/// Returns `Validation` when the URL is empty or its scheme is not
/// `http://` or `https://`.
pub fn validate_key_url(url: &str) -> Result<(), ProvisionError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::validation("remote key URL is empty"));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ProvisionError::validation(format!(
            "remote key URL must use http:// or https://, got `{trimmed}`"
        )));
    }
    Ok(())
}

/// Downloads a public key into memory.
///
/// The URL is validated before the request is built, so a malformed URL
/// never produces network traffic.
///
/// # Errors
/// Returns `Validation` for a bad URL and `Download` for transport errors,
/// non-2xx responses, empty bodies, or non-UTF-8 content.
pub async fn download_key(url: &str, timeout: Duration) -> Result<Secret, ProvisionError> {
    validate_key_url(url)?;
    let url = url.trim();

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProvisionError::Download {
            url: url.to_string(),
            detail: format!("failed to build HTTP client: {e}"),
        })?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProvisionError::Download {
            url: url.to_string(),
            detail: format!("request failed: {e}"),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProvisionError::Download {
            url: url.to_string(),
            detail: format!("server returned {status}"),
        });
    }
    let body = response.bytes().await.map_err(|e| ProvisionError::Download {
        url: url.to_string(),
        detail: format!("failed to read response body: {e}"),
    })?;
    if body.is_empty() {
        return Err(ProvisionError::Download {
            url: url.to_string(),
            detail: "downloaded key is empty".to_string(),
        });
    }
    let contents = String::from_utf8(body.to_vec()).map_err(|_| ProvisionError::Download {
        url: url.to_string(),
        detail: "downloaded key is not valid UTF-8".to_string(),
    })?;
    Ok(Secret::downloaded_key(url, contents))
}

/// Downloads a public key and installs it at `dest` with mode 600.
///
/// The body is buffered completely before anything is written, and the write
/// is temp-then-rename in the destination directory, so a partial or failed
/// download never leaves a file at `dest`.
///
/// # Errors
/// Propagates `download_key` failures plus write errors.
pub async fn fetch_remote_key(
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<Secret, ProvisionError> {
    let secret = download_key(url, timeout).await?;
    fs_util::write_atomic(dest, secret.expose().as_bytes(), KEY_FILE_MODE).await?;
    info!("installed remote key at {}", dest.display());
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_url_accepts_http_and_https() {
        validate_key_url("http://example.com/key.pub").unwrap();
        validate_key_url("https://example.com/key.pub").unwrap();
    }

    #[test]
    fn test_validate_key_url_rejects_other_schemes() {
        let err = validate_key_url("ftp://example.com/key.pub").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn test_validate_key_url_rejects_empty() {
        let err = validate_key_url("").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        let err = validate_key_url("   ").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }
}
