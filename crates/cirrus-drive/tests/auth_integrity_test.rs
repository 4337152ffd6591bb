//! Integration tests: SRP login and signature chain verification.

mod common;

use cirrus_core::DriveError;
use cirrus_crypto::{SrpClient, SrpGroup};
use cirrus_drive::{authenticate, MemoryRemote, Trust};
use common::{fixture, load_tree};
use secrecy::SecretString;

fn registered_remote(identity: &str, password: &str) -> MemoryRemote {
    let remote = MemoryRemote::new();
    let mut client = SrpClient::new(SrpGroup::rfc5054_2048().unwrap(), identity).unwrap();
    let registration = client
        .generate_registration_credentials(&SecretString::from(password))
        .unwrap();
    remote.register_account(identity, registration);
    remote
}

#[tokio::test]
async fn srp_login_round_trip() {
    let remote = registered_remote("alice@x.com", "correct horse battery");
    let session = authenticate(&remote, "alice@x.com", &SecretString::from("correct horse battery"))
        .await
        .expect("login succeeds");
    assert!(!session.session_id.is_empty());
    assert_eq!(session.shared_key().as_bytes().len(), 32);
}

#[tokio::test]
async fn srp_login_with_wrong_password_fails() {
    let remote = registered_remote("alice@x.com", "correct horse battery");
    let err = authenticate(&remote, "alice@x.com", &SecretString::from("tr0ub4dor"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::Protocol(_)), "{err}");
}

#[tokio::test]
async fn srp_login_for_unknown_account_fails() {
    let remote = registered_remote("alice@x.com", "pw");
    let err = authenticate(&remote, "bob@x.com", &SecretString::from("pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::NotFound(_)));
}

#[tokio::test]
async fn seeded_tree_verifies() {
    let fx = fixture().await;
    load_tree(&fx.client).await;

    assert!(fx.client.verify("share1").await.unwrap());
    assert!(fx.client.verify("root123").await.unwrap());

    let report = fx.client.verify_tree("folderA").await.unwrap();
    assert!(report.verified, "{:?}", report.unverified_items);
    assert!(report.unverified_items.is_empty());
    assert_eq!(report.chain, vec!["root123".to_string(), "share1".to_string()]);
    assert_eq!(fx.client.node("file1").unwrap().trust, Trust::Verified);
}

#[tokio::test]
async fn foreign_signer_is_distrusted_but_readable() {
    let mut fx = fixture().await;
    fx.seeder
        .signed_by("mallory@x.com")
        .file("folderA", "file5", "invoice.pdf", 7)
        .expect("seed file");
    load_tree(&fx.client).await;

    let report = fx.client.verify_tree("folderA").await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.unverified_items, vec!["file5".to_string()]);

    let node = fx.client.node("file5").expect("still cached");
    assert_eq!(node.name, "invoice.pdf");
    assert!(matches!(node.trust, Trust::Distrusted(_)));
}

#[tokio::test]
async fn swapped_passphrase_signature_fails_verification() {
    let fx = fixture().await;
    let other = fx.remote.link("file2").unwrap().passphrase_signature;
    fx.remote
        .tamper("file1", |link| link.passphrase_signature = other);
    load_tree(&fx.client).await;

    assert!(!fx.client.verify("file1").await.unwrap());
    assert!(fx.client.verify("file2").await.unwrap());
}
