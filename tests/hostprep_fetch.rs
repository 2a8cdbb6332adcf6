use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use hostprep::error::ProvisionError;
use hostprep::fetch;
use hostprep::secret::SecretSource;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);
const KEY_BODY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJx semaphore@mgmt\n";

#[tokio::test]
async fn downloads_key_and_installs_with_mode_600() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/keys/semaphore.pub"))
        .respond_with(ResponseTemplate::new(200).set_body_string(KEY_BODY))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("authorized_keys");
    let url = format!("{}/keys/semaphore.pub", server.uri());

    let secret = fetch::fetch_remote_key(&url, &dest, TIMEOUT).await.unwrap();

    assert_eq!(secret.expose(), KEY_BODY);
    assert_eq!(secret.source(), &SecretSource::Downloaded(url));
    let metadata = std::fs::metadata(&dest).unwrap();
    assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), KEY_BODY);
}

#[tokio::test]
async fn non_2xx_response_leaves_no_file_at_destination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.pub"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("authorized_keys");

    let err = fetch::fetch_remote_key(&format!("{}/missing.pub", server.uri()), &dest, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Download { .. }));
    assert!(!dest.exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn empty_body_is_a_download_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.pub"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("authorized_keys");

    let err = fetch::fetch_remote_key(&format!("{}/empty.pub", server.uri()), &dest, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Download { .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn bad_scheme_fails_validation_before_any_request() {
    let server = MockServer::start().await;
    let address = server.address().to_string();

    let err = fetch::download_key(&format!("ftp://{address}/key.pub"), TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn empty_url_fails_validation() {
    let err = fetch::download_key("", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
}
