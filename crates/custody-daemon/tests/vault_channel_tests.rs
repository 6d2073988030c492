//! End-to-end tests of the vault over an in-memory channel

mod common;

use serde_json::json;
use std::sync::Arc;

use custody_core::{derive_from_extended_key, sha256, MessageHash, ProofStatement, ProofType};
use custody_daemon::{DaemonError, Dispatcher, InitOutcome, VaultClient};

use common::{inited, serve, trusted, untrusted, vault, RawPeer, PEER};

fn dispatcher(redirect: Option<&str>) -> Arc<Dispatcher<custody_daemon::Vault>> {
    Arc::new(Dispatcher::new(vault(redirect), 64))
}

#[tokio::test]
async fn test_key_operations_end_to_end() {
    let client = inited(serve(dispatcher(None), Some(PEER)), trusted()).await;

    assert_eq!(client.app_id().await.unwrap(), PEER);

    // Public derivation from the parent xpub matches private derivation
    let parent = client.key_info("auto", "m/0").await.unwrap();
    let child = client.key_info("auto", "m/0/5").await.unwrap();
    assert_eq!(client.derive(&parent.pubex, "m/5").await.unwrap(), child);
    assert_eq!(
        derive_from_extended_key(&parent.pubex, &"m/5".parse().unwrap()).unwrap(),
        child
    );

    let hash = MessageHash::new(sha256(b"transfer 10"));
    let signed = client.sign("auto", "m/0/5", &hash).await.unwrap();
    assert_eq!(signed.hash, hash);
    let recovered = client
        .recover(&signed.signature, signed.recovery, &hash)
        .await
        .unwrap();
    assert_eq!(recovered, child.pubkey);

    for len in [0usize, 1, 1024] {
        let plaintext = vec![0xA5u8; len];
        let envelope = client.encrypt(&child.pubkey, &plaintext).await.unwrap();
        let opened = client.decrypt("auto", "m/0/5", &envelope).await.unwrap();
        assert_eq!(opened, plaintext);
    }

    let proof = client
        .get_proof("auto", "m/0/5", ProofType::Pub)
        .await
        .unwrap();
    assert!(client.verify_proof(&proof).await.unwrap());

    let statement = ProofStatement::decode(&proof.message).unwrap();
    assert_eq!(statement.origin, PEER);
    assert_eq!(statement.key, child.pubkey.to_hex());

    let attestation = client.attestation_key().await.unwrap();
    assert!(custody_core::verify_proof(
        &proof.signature.to_hex(),
        proof.recovery,
        &proof.message,
        &attestation
    )
    .unwrap());
}

#[tokio::test]
async fn test_purpose_setup_over_channel() {
    let client = inited(serve(dispatcher(None), Some(PEER)), trusted()).await;

    assert!(client.setup_purpose("payments", "pay").await.unwrap());
    assert!(client.setup_purpose("payments", "pay").await.unwrap());

    let pay = client.key_info("pay", "m/0").await.unwrap();
    let auto = client.key_info("auto", "m/0").await.unwrap();
    assert_ne!(pay.pubex, auto.pubex);

    match client.setup_purpose("other", "pay").await {
        Err(DaemonError::Remote { code, .. }) => assert_eq!(code, "AliasConflict"),
        other => panic!("expected AliasConflict, got {:?}", other.map(|_| ())),
    }

    match client.key_info("nope", "m/0").await {
        Err(e) => assert_eq!(e.code(), "InvalidPurpose"),
        Ok(_) => panic!("unknown alias accepted"),
    }
}

#[tokio::test]
async fn test_tampered_envelope_over_channel() {
    let client = inited(serve(dispatcher(None), Some(PEER)), trusted()).await;
    let key = client.key_info("auto", "m/1").await.unwrap();

    let mut envelope = client.encrypt(&key.pubkey, b"secret").await.unwrap();
    envelope.mac[0] ^= 0x01;
    let err = client.decrypt("auto", "m/1", &envelope).await.unwrap_err();
    assert_eq!(err.code(), "DecryptionFailed");
}

#[tokio::test]
async fn test_same_origin_gets_same_keys_across_sessions() {
    let dispatcher = dispatcher(None);
    let first = inited(serve(Arc::clone(&dispatcher), Some(PEER)), trusted()).await;
    let second = inited(serve(Arc::clone(&dispatcher), Some(PEER)), trusted()).await;
    let other = inited(serve(dispatcher, Some("unix:uid=1001")), trusted()).await;

    let a = first.key_info("auto", "m/0").await.unwrap();
    let b = second.key_info("auto", "m/0").await.unwrap();
    let c = other.key_info("auto", "m/0").await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a.pubkey, c.pubkey);
}

#[tokio::test]
async fn test_ready_then_inited() {
    let mut peer = RawPeer::new(serve(dispatcher(None), Some(PEER)));
    peer.init_trusted().await;
}

#[tokio::test]
async fn test_messages_before_init_are_dropped() {
    let mut peer = RawPeer::new(serve(dispatcher(None), Some(PEER)));
    assert_eq!(peer.expect().await, json!({"ready": true}));

    peer.send(json!({"getAppId": {}, "callback": "early"})).await;
    peer.send(json!({"init": {"useOrigin": true}, "callback": "init"}))
        .await;

    let reply = peer.expect().await;
    assert_eq!(reply, json!({"callback": "init", "result": "inited"}));

    peer.send(json!({"getAppId": {}, "callback": "late"})).await;
    assert_eq!(peer.expect().await, json!({"callback": "late", "result": PEER}));
}

#[tokio::test]
async fn test_repeated_init_is_ignored() {
    let mut peer = RawPeer::new(serve(dispatcher(None), Some(PEER)));
    peer.init_trusted().await;

    peer.send(json!({"init": {"useOrigin": true}, "callback": "again"}))
        .await;
    peer.send(json!({"init": {"useOrigin": false}, "callback": "again2"}))
        .await;
    peer.send(json!({"getAppId": {}, "callback": "next"})).await;

    let reply = peer.expect().await;
    assert_eq!(reply["callback"], "next");
    assert_eq!(reply["result"], PEER);
}

#[tokio::test]
async fn test_unknown_and_invalid_requests() {
    let mut peer = RawPeer::new(serve(dispatcher(None), Some(PEER)));
    peer.init_trusted().await;

    peer.send(json!({"frobnicate": {}, "callback": "u"})).await;
    let reply = peer.expect().await;
    assert_eq!(reply["callback"], "u");
    assert_eq!(reply["error"]["code"], "UnknownOperation");

    // No callback: dropped without a reply
    peer.send(json!({"getAppId": {}})).await;

    peer.send(json!({"sign": {"hash": "00"}, "callback": "bad"}))
        .await;
    let reply = peer.expect().await;
    assert_eq!(reply["callback"], "bad");
    assert_eq!(reply["error"]["code"], "InvalidRequest");

    peer.send(json!({
        "keyInfo": {"key": {"purpose": "auto", "derive": "m/0''"}},
        "callback": "path",
    }))
    .await;
    let reply = peer.expect().await;
    assert_eq!(reply["callback"], "path");
    assert_eq!(reply["error"]["code"], "InvalidPathOrPurpose");
}

#[tokio::test]
async fn test_trust_failure_closes_channel() {
    let mut peer = RawPeer::new(serve(dispatcher(None), Some(PEER)));
    assert_eq!(peer.expect().await, json!({"ready": true}));

    peer.send(json!({"init": {"useOrigin": false}, "callback": "init"}))
        .await;
    assert_eq!(peer.recv().await, None);
}

#[tokio::test]
async fn test_trusted_init_without_peer_identity_fails() {
    let stream = serve(dispatcher(None), None);
    let err = match VaultClient::handshake(stream, trusted()).await {
        Err(e) => e,
        Ok(_) => panic!("handshake succeeded without a peer identity"),
    };
    assert!(matches!(err, DaemonError::TrustEstablishmentFailed(_)));
}

#[tokio::test]
async fn test_redirect_for_cookie() {
    let url = "https://cookies.example/issue";
    let mut peer = RawPeer::new(serve(dispatcher(Some(url)), None));
    assert_eq!(peer.expect().await, json!({"ready": true}));

    peer.send(json!({"init": {"useOrigin": false}, "callback": "init"}))
        .await;
    assert_eq!(
        peer.expect().await,
        json!({"callback": "init", "result": "redirectForCookie", "url": url})
    );
    assert_eq!(peer.recv().await, None);
}

#[tokio::test]
async fn test_cookie_binds_untrusted_session() {
    let url = "https://cookies.example/issue";
    let dispatcher = dispatcher(Some(url));

    let trusted_client = inited(serve(Arc::clone(&dispatcher), Some(PEER)), trusted()).await;
    let cookie = trusted_client.issue_cookie().await.unwrap();
    let expected = trusted_client.key_info("auto", "m/0").await.unwrap();

    let cookie_client = inited(
        serve(Arc::clone(&dispatcher), None),
        untrusted(Some(&cookie)),
    )
    .await;
    assert_eq!(cookie_client.app_id().await.unwrap(), PEER);
    assert_eq!(cookie_client.key_info("auto", "m/0").await.unwrap(), expected);

    assert!(trusted_client.revoke_cookie(&cookie).await.unwrap());

    match VaultClient::handshake(serve(dispatcher, None), untrusted(Some(&cookie)))
        .await
        .unwrap()
    {
        InitOutcome::Redirect { url: got } => assert_eq!(got, url),
        InitOutcome::Inited(_) => panic!("revoked cookie still accepted"),
    }
}
