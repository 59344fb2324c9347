//! Keyshare sub-protocol scenarios: PIN retry and lockout, missing
//! enrollment, and a full distributed disclosure round.

mod common;

use std::sync::Arc;

use common::*;
use irma_core::{
    Action, CredentialTypeIdentifier, ErrorKind, Issuer, IssuerIdentifier, MetadataAttribute,
    SchemeManagerIdentifier,
};
use irma_client::{Credential, KeyshareEnrollment, PinStatus};
use irma_idemix::{PaillierPrivateKey, TestIssuer};

fn setup_distributed(env: &TestEnv) -> Arc<TestIssuer> {
    let issuer = Arc::new(TestIssuer::with_counter(3, 0));
    {
        let mut conf = env.client.configuration.write().unwrap();
        conf.issuers.insert(
            IssuerIdentifier::new(TEST_ISSUER),
            Issuer {
                id: IssuerIdentifier::new(TEST_ISSUER),
                name: "Keyshare test issuer".into(),
                contact_url: String::new(),
            },
        );
        conf.credential_types.insert(
            CredentialTypeIdentifier::new(TEST_CREDTYPE),
            test_credential_type(),
        );
        conf.insert_public_key(
            IssuerIdentifier::new(TEST_ISSUER),
            public_key_of(&issuer, TEST_ISSUER),
        );
        conf.install_scheme_manager(distributed_manager());
    }
    issuer
}

fn enroll(env: &TestEnv) -> PaillierPrivateKey {
    let key = PaillierPrivateKey::bootstrap();
    env.client
        .set_keyshare_enrollment(
            SchemeManagerIdentifier::new(TEST_MANAGER),
            KeyshareEnrollment {
                username: "testuser".into(),
                nonce: vec![1, 2, 3],
                token: "token".into(),
                private_key: key.clone(),
            },
        )
        .unwrap();
    key
}

fn seed_keyshare_credential(env: &TestEnv, issuer: &TestIssuer, email: &str) {
    let meta = MetadataAttribute::new(CredentialTypeIdentifier::new(TEST_CREDTYPE), 0, 365);
    let attributes = vec![
        meta.to_int(),
        env.client.master_secret(),
        irma_core::encode_attribute_value(email),
    ];
    let signature = issuer.sign(&attributes);
    env.client
        .add_credential(Credential {
            credential_type: CredentialTypeIdentifier::new(TEST_CREDTYPE),
            attributes,
            signature,
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// S5: PIN retry, then lockout
// ---------------------------------------------------------------------------

#[test]
fn keyshare_pin_retry_and_block() {
    let env = TestEnv::bare("keyshare-block");
    let issuer = setup_distributed(&env);
    let paillier = enroll(&env);
    seed_keyshare_credential(&env, &issuer, "user@example.com");

    let keyshare = MockKeyshareServer::new(
        vec![
            PinStatus::Failure {
                remaining_attempts: 2,
            },
            PinStatus::Failure {
                remaining_attempts: 1,
            },
            PinStatus::Blocked { duration: 600 },
        ],
        42,
        paillier,
    );
    env.factory.with_keyshare(keyshare);
    let requestor = MockRequestor::disclosure(disclosure_jwt(
        "testsp",
        vec![disjunction_for("test.test.mijnirma.email")],
    ));
    env.factory.with_requestor(requestor.clone());

    let (handler, outcomes) = TestHandler::with_pins(vec!["0000", "1111", "2222"]);
    env.client
        .new_session(
            &qr("http://requestor.example/session/k1", Action::Disclosing),
            handler,
        )
        .expect("session starts");

    match await_outcome(&outcomes) {
        Outcome::KeyshareBlocked(manager, duration) => {
            assert_eq!(manager, SchemeManagerIdentifier::new(TEST_MANAGER));
            assert_eq!(duration, 600);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    match await_outcome(&outcomes) {
        Outcome::Failure(_, err) => assert_eq!(err.kind, ErrorKind::Keyshare),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(requestor.delete_count(), 1);
}

// ---------------------------------------------------------------------------
// Missing enrollment aborts before keyshare traffic
// ---------------------------------------------------------------------------

#[test]
fn keyshare_enrollment_missing_aborts() {
    let env = TestEnv::bare("keyshare-unenrolled");
    let issuer = setup_distributed(&env);
    seed_keyshare_credential(&env, &issuer, "user@example.com");

    assert_eq!(
        env.client.unenrolled_scheme_managers(),
        vec![SchemeManagerIdentifier::new(TEST_MANAGER)]
    );

    let requestor = MockRequestor::disclosure(disclosure_jwt(
        "testsp",
        vec![disjunction_for("test.test.mijnirma.email")],
    ));
    env.factory.with_requestor(requestor.clone());

    let (handler, outcomes) = TestHandler::new();
    env.client
        .new_session(
            &qr("http://requestor.example/session/k2", Action::Disclosing),
            handler,
        )
        .expect("session starts");

    match await_outcome(&outcomes) {
        Outcome::EnrollmentMissing(manager) => {
            assert_eq!(manager, SchemeManagerIdentifier::new(TEST_MANAGER));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(requestor.delete_count(), 1);
    assert!(outcomes.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Happy path: PIN accepted, commitments blended, proofs posted
// ---------------------------------------------------------------------------

#[test]
fn keyshare_disclosure_succeeds() {
    let env = TestEnv::bare("keyshare-happy");
    let issuer = setup_distributed(&env);
    let paillier = enroll(&env);
    seed_keyshare_credential(&env, &issuer, "user@example.com");

    let keyshare = MockKeyshareServer::new(vec![PinStatus::Success], 42, paillier);
    env.factory.with_keyshare(keyshare);
    let requestor = MockRequestor::disclosure(disclosure_jwt(
        "testsp",
        vec![disjunction_for("test.test.mijnirma.email")],
    ));
    env.factory.with_requestor(requestor.clone());

    let (handler, outcomes) = TestHandler::with_pins(vec!["1234"]);
    env.client
        .new_session(
            &qr("http://requestor.example/session/k3", Action::Disclosing),
            handler,
        )
        .expect("session starts");

    match await_outcome(&outcomes) {
        Outcome::Success(Action::Disclosing, _) => {}
        other => panic!("unexpected outcome {:?}", other),
    }

    let posted = requestor
        .posted_proofs
        .lock()
        .unwrap()
        .clone()
        .expect("proofs posted");
    assert_eq!(posted.len(), 1);
    match &posted[0] {
        irma_idemix::Proof::Disclosure(p) => {
            // email disclosed, secret response present (with the server
            // share folded in)
            assert!(p.a_disclosed.contains_key(&2));
            assert!(p.a_responses.contains_key(&1));
        }
        other => panic!("unexpected proof {:?}", other),
    }
    assert_eq!(requestor.delete_count(), 0);
}
