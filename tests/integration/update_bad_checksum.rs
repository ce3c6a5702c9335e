//! Update integrity.
//!
//! A download whose SHA-256 does not match the advertised checksum is
//! rejected: the staged file is deleted and the running binary untouched.
//! A matching checksum stages cleanly.

use scribe_protocol::UpdateInfo;
use scribe_test_utils::MockHttpApi;
use scribe_updater::{UpdateChecker, UpdateStatus};
use sha2::{Digest, Sha256};

#[tokio::test]
async fn wrong_checksum_rejects_download_and_leaves_binary_alone() {
    let api = MockHttpApi::start().await.unwrap();
    api.set_update(
        UpdateInfo {
            available: true,
            version: "9.9.9".to_owned(),
            url: format!("{}/download/agent", api.base_url()),
            checksum: "ab".repeat(32),
        },
        b"malicious or corrupt bytes".to_vec(),
    )
    .await;

    let checker = UpdateChecker::new(api.base_url(), "1.0.0").unwrap();
    assert_eq!(
        checker.check().await.unwrap(),
        UpdateStatus::Available {
            version: "9.9.9".to_owned()
        }
    );

    let dir = tempfile::tempdir().unwrap();
    let exe = dir.path().join("scribe");
    std::fs::write(&exe, b"current binary").unwrap();

    let info = checker.fetch_info().await.unwrap();
    let err = checker.download_and_stage(&info, &exe).await.unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"), "got: {err}");

    assert!(
        !dir.path().join("scribe.new").exists(),
        "rejected download does not remain on disk"
    );
    assert_eq!(
        std::fs::read(&exe).unwrap(),
        b"current binary",
        "running binary untouched"
    );
}

#[tokio::test]
async fn matching_checksum_stages_the_binary() {
    let api = MockHttpApi::start().await.unwrap();
    let payload = b"shiny new agent".to_vec();
    api.set_update(
        UpdateInfo {
            available: true,
            version: "2.0.0".to_owned(),
            url: format!("{}/download/agent", api.base_url()),
            checksum: hex::encode(Sha256::digest(&payload)),
        },
        payload.clone(),
    )
    .await;

    let checker = UpdateChecker::new(api.base_url(), "1.0.0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let exe = dir.path().join("scribe");
    std::fs::write(&exe, b"current binary").unwrap();

    let info = checker.fetch_info().await.unwrap();
    let staged = checker.download_and_stage(&info, &exe).await.unwrap();
    assert_eq!(staged, dir.path().join("scribe.new"));
    assert_eq!(std::fs::read(&staged).unwrap(), payload);
}

#[tokio::test]
async fn same_version_is_up_to_date() {
    let api = MockHttpApi::start().await.unwrap();
    api.set_update(
        UpdateInfo {
            available: true,
            version: "1.0.0".to_owned(),
            url: String::new(),
            checksum: String::new(),
        },
        vec![],
    )
    .await;

    let checker = UpdateChecker::new(api.base_url(), "1.0.0").unwrap();
    assert_eq!(checker.check().await.unwrap(), UpdateStatus::UpToDate);
}
