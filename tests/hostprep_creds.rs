use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use hostprep::secret::Secret;
use hostprep::sink::{CREDENTIALS_DIR_MODE, CREDENTIALS_MODE, CredentialRecord};
use tempfile::tempdir;

fn sample_record(path: PathBuf) -> CredentialRecord {
    let mut record = CredentialRecord::new(path, None);
    record.push("MAAS_URL", "http://localhost:5240/MAAS");
    record.push("MAAS_ADMIN_USERNAME", "admin");
    record.push_secret(
        "MAAS_ADMIN_PASSWORD",
        &Secret::provided_password("correct-horse-battery".to_string()),
    );
    record
}

#[tokio::test]
async fn persists_with_restrictive_modes_and_full_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("maas").join("maas.creds");
    let record = sample_record(path.clone());

    let written = record.persist().await.unwrap();

    assert_eq!(written, path);
    let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(file_mode, CREDENTIALS_MODE);
    let dir_mode = std::fs::metadata(path.parent().unwrap())
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(dir_mode, CREDENTIALS_DIR_MODE);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("MAAS_URL=http://localhost:5240/MAAS"));
    assert!(contents.contains("MAAS_ADMIN_PASSWORD=correct-horse-battery"));
    assert!(record.matches_contents(&contents));
}

#[tokio::test]
async fn repersisting_identical_fields_still_matches() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("maas.creds");
    let record = sample_record(path.clone());

    record.persist().await.unwrap();
    record.persist().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(record.matches_contents(&contents));
    // One comment header, three fields, nothing duplicated.
    assert_eq!(contents.lines().count(), 4);
}

#[tokio::test]
async fn no_temporary_file_survives_a_successful_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("maas.creds");

    sample_record(path).persist().await.unwrap();

    let stray: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name != "maas.creds")
        .collect();
    assert!(stray.is_empty(), "unexpected files: {stray:?}");
}

#[test]
fn debug_output_never_contains_secret_values() {
    let record = sample_record(PathBuf::from("/tmp/maas.creds"));
    let debug = format!("{record:?}");
    assert!(debug.contains("MAAS_ADMIN_PASSWORD"));
    assert!(!debug.contains("correct-horse-battery"));
}
