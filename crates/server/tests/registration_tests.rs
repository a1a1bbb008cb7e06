//! Invite and registration handshake tests.

mod common;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{ADMIN_TOKEN, TestAgent, TestServer};
use ocspwatch_core::RegistrationClaims;
use ocspwatch_metadata::repos::LocationRepo;
use ocspwatch_server::registration::{
    RegistrationError, create_invite, process_registration, register_envelope,
};
use ocspwatch_signer::{KeyAlgorithm, sign_compact};
use serde_json::{Value, json};
use time::OffsetDateTime;

fn rejected() -> Value {
    json!({ "code": "registration_rejected", "message": "registration rejected" })
}

fn tampered(token: &str, index: usize) -> String {
    let mut bytes = URL_SAFE_NO_PAD.decode(token).unwrap();
    bytes[index] ^= 0x01;
    URL_SAFE_NO_PAD.encode(bytes)
}

#[tokio::test]
async fn test_register_binds_key_to_invite() {
    let server = TestServer::new().await;
    let token = server.invite("frankfurt-1").await;
    let agent = TestAgent::ed25519();

    let (status, body) = server
        .post_envelope("/v1/register", &agent.registration(&token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "frankfurt-1");
    assert_eq!(body["key_id"], agent.key_id().to_string());

    let location = server
        .metadata()
        .get_location_by_key_id(agent.key_id())
        .await
        .unwrap()
        .unwrap();
    assert!(location.is_registered());
    assert_eq!(location.public_key.as_deref(), Some(agent.public_pem().as_str()));
}

#[tokio::test]
async fn test_register_with_p256_key() {
    let server = TestServer::new().await;
    let token = server.invite("tokyo-1").await;
    let agent = TestAgent::new(KeyAlgorithm::P256);

    let (status, body) = server
        .post_envelope("/v1/register", &agent.registration(&token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["key_id"], agent.key_id().to_string());
}

#[tokio::test]
async fn test_invite_is_single_use() {
    let server = TestServer::new().await;
    let token = server.invite("paris-1").await;
    let agent = TestAgent::ed25519();
    let envelope = agent.registration(&token);

    let (status, _) = server.post_envelope("/v1/register", &envelope).await;
    assert_eq!(status, StatusCode::OK);

    // Replaying the same envelope.
    let (status, body) = server.post_envelope("/v1/register", &envelope).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, rejected());

    // Another key on the used invite.
    let other = TestAgent::ed25519();
    let (status, body) = server
        .post_envelope("/v1/register", &other.registration(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, rejected());
}

#[tokio::test]
async fn test_every_rejection_looks_the_same() {
    let server = TestServer::new().await;
    let token = server.invite("madrid-1").await;
    let agent = TestAgent::ed25519();

    // Wrong validator, unknown selector, garbage body.
    let wrong_validator = agent.registration(&tampered(&token, 31));
    let unknown_selector = agent.registration(&tampered(&token, 0));
    let cases = [wrong_validator, unknown_selector, "not-a-jws".to_string()];

    for envelope in cases {
        let (status, body) = server.post_envelope("/v1/register", &envelope).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, rejected());
    }

    // The invite still works after the failed attempts.
    let (status, _) = server
        .post_envelope("/v1/register", &agent.registration(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_wrong_token_length_rejected_before_lookup() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let agent = TestAgent::ed25519();
    let key = agent.key.public_key();
    let now = OffsetDateTime::now_utc();

    for len in [0, 31, 33] {
        let err = process_registration(metadata.as_ref(), &vec![7u8; len], &key, now)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Malformed(_)), "len {len}");
    }
}

#[tokio::test]
async fn test_precise_rejection_reasons() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let now = OffsetDateTime::now_utc();
    let invite = create_invite(metadata.as_ref(), "lisbon-1").await.unwrap();
    let agent = TestAgent::ed25519();
    let key = agent.key.public_key();

    let mut wrong = invite.token.to_bytes();
    wrong[31] ^= 0xff;
    let err = process_registration(metadata.as_ref(), &wrong, &key, now)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::ValidatorMismatch));

    let mut unknown = invite.token.to_bytes();
    unknown[0] ^= 0xff;
    let err = process_registration(metadata.as_ref(), &unknown, &key, now)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::UnknownInvite));

    let location = process_registration(metadata.as_ref(), &invite.token.to_bytes(), &key, now)
        .await
        .unwrap();
    assert_eq!(location.location_id, invite.location_id);

    let err = process_registration(metadata.as_ref(), &invite.token.to_bytes(), &key, now)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::AlreadyRegistered));
}

#[tokio::test]
async fn test_key_cannot_register_twice() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let now = OffsetDateTime::now_utc();
    let agent = TestAgent::ed25519();

    let first = server.invite("oslo-1").await;
    register_envelope(metadata.as_ref(), &agent.registration(&first), now)
        .await
        .unwrap();

    let second = server.invite("oslo-2").await;
    let err = register_envelope(metadata.as_ref(), &agent.registration(&second), now)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::KeyInUse));
}

#[tokio::test]
async fn test_envelope_must_be_signed_by_registered_key() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let token = server.invite("rome-1").await;
    let signer = TestAgent::ed25519();
    let claimed = TestAgent::ed25519();

    let claims = RegistrationClaims {
        public_key: claimed.public_pem(),
        invite_token: token,
    };
    let envelope = sign_compact(&signer.key, None, &claims).unwrap();

    let err = register_envelope(metadata.as_ref(), &envelope, OffsetDateTime::now_utc())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::BadSignature | RegistrationError::Malformed(_)
    ));
}

#[tokio::test]
async fn test_unsupported_key_algorithm_rejected() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let token = server.invite("vienna-1").await;
    let signer = TestAgent::ed25519();

    let p384 = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
    let claims = RegistrationClaims {
        public_key: p384.public_key_pem(),
        invite_token: token,
    };
    let envelope = sign_compact(&signer.key, None, &claims).unwrap();

    let err = register_envelope(metadata.as_ref(), &envelope, OffsetDateTime::now_utc())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::Malformed(_)));

    let (status, body) = server.post_envelope("/v1/register", &envelope).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, rejected());
}

#[tokio::test]
async fn test_concurrent_registrations_admit_one_winner() {
    let server = TestServer::new().await;
    let token = server.invite("warsaw-1").await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let metadata = server.metadata();
        let envelope = TestAgent::ed25519().registration(&token);
        handles.push(tokio::spawn(async move {
            register_envelope(metadata.as_ref(), &envelope, OffsetDateTime::now_utc()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(RegistrationError::AlreadyRegistered) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_invite_requires_admin_and_valid_name() {
    let server = TestServer::new().await;

    let (status, _) = server
        .json(
            "POST",
            "/v1/admin/invites",
            Some(json!({ "name": "x" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let too_long = "n".repeat(129);
    for name in ["", "   ", too_long.as_str()] {
        let (status, body) = server
            .json(
                "POST",
                "/v1/admin/invites",
                Some(json!({ "name": name })),
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    let (status, body) = server
        .json(
            "POST",
            "/v1/admin/invites",
            Some(json!({ "name": "berlin-1" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["invite_token"].as_str().unwrap();
    assert_eq!(URL_SAFE_NO_PAD.decode(token).unwrap().len(), 32);

    // Only the selector and the validator hash are stored.
    let location = server
        .metadata()
        .get_location(body["location_id"].as_str().unwrap().parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(!location.is_registered());
    assert_eq!(location.selector.len(), 16);
    assert!(!location.validator_hash.contains(token));
}

#[tokio::test]
async fn test_location_listing_tracks_registration() {
    let server = TestServer::new().await;
    let (status, _) = server
        .json("GET", "/v1/admin/locations", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = server.invite("frankfurt-1").await;
    server.invite("berlin-1").await;
    let agent = TestAgent::ed25519();
    let (status, _) = server
        .post_envelope("/v1/register", &agent.registration(&token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server
        .json("GET", "/v1/admin/locations", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    let locations = body.as_array().unwrap();
    assert_eq!(locations.len(), 2);

    assert_eq!(locations[0]["name"], "berlin-1");
    assert_eq!(locations[0]["registered"], false);
    assert!(locations[0]["key_id"].is_null());
    assert!(locations[0]["registered_at"].is_null());

    assert_eq!(locations[1]["name"], "frankfurt-1");
    assert_eq!(locations[1]["registered"], true);
    assert_eq!(locations[1]["key_id"], agent.key_id().to_string());

    // Invite secrets never leave the server.
    for location in locations {
        assert!(location.get("selector").is_none());
        assert!(location.get("validator_hash").is_none());
    }
}
