//! The keyshare sub-protocol: PIN authentication against each distributed
//! scheme manager's keyshare server, blending of the server's commitment
//! into every proof builder, a single shared challenge round, and summing
//! of the server's response share into the local proofs.

use std::sync::mpsc;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;

use irma_core::{ErrorKind, SchemeManagerIdentifier, SessionError};
use irma_idemix::{create_challenge, Proof, ProofBuilder};

use crate::client::KeyshareEnrollment;
use crate::session::Handler;
use crate::transport::{KeyshareTransport, PinStatus};

/// How keyshare outcomes re-enter the session engine.
pub(crate) trait KeyshareSessionHandler: Send + Sync {
    fn keyshare_done(&self, proofs: Vec<Proof>);
    fn keyshare_cancelled(&self);
    fn keyshare_blocked(&self, manager: &SchemeManagerIdentifier, duration: u32);
    fn keyshare_error(&self, error: SessionError);
}

/// One distributed scheme manager taking part in the session.
pub(crate) struct KeyshareParticipant {
    pub id: SchemeManagerIdentifier,
    pub enrollment: KeyshareEnrollment,
    pub transport: Arc<dyn KeyshareTransport>,
}

/// Resolves the PIN dialog. The keyshare task blocks on the channel, so
/// the UI may answer from any thread.
pub struct PinCallback {
    pub(crate) sender: mpsc::Sender<Option<String>>,
}

impl PinCallback {
    pub fn enter(self, pin: impl Into<String>) {
        let _ = self.sender.send(Some(pin.into()));
    }

    pub fn cancel(self) {
        let _ = self.sender.send(None);
    }
}

/// Drive the whole keyshare round. Messages to a single server are
/// strictly serialised; the challenge is derived exactly once, over the
/// fixed builder order, after every server commitment has been blended.
pub(crate) fn run_keyshare_session(
    session: &dyn KeyshareSessionHandler,
    ui: &dyn Handler,
    mut builders: Vec<ProofBuilder>,
    context: BigUint,
    nonce: BigUint,
    participants: Vec<KeyshareParticipant>,
) {
    if participants.is_empty() {
        session.keyshare_error(SessionError::with_info(
            ErrorKind::Keyshare,
            "no keyshare participants",
        ));
        return;
    }

    for participant in &participants {
        if !verify_pin(session, ui, participant) {
            return;
        }
    }

    for builder in builders.iter_mut() {
        if let Err(e) = builder.commit() {
            session.keyshare_error(e.into());
            return;
        }
    }

    let keys: Vec<(String, u32)> = builders
        .iter()
        .map(|b| {
            let pk = b.public_key();
            (pk.issuer.clone(), pk.counter)
        })
        .collect();
    for participant in &participants {
        let commitments = match participant.transport.get_commitments(&keys) {
            Ok(commitments) => commitments,
            Err(e) => {
                session.keyshare_error(e);
                return;
            }
        };
        if commitments.len() != builders.len() {
            session.keyshare_error(SessionError::with_info(
                ErrorKind::Keyshare,
                "commitment count mismatch",
            ));
            return;
        }
        for (builder, w) in builders.iter_mut().zip(&commitments) {
            if let Err(e) = builder.set_keyshare_commitment(w) {
                session.keyshare_error(e.into());
                return;
            }
        }
    }

    let mut contributions = Vec::new();
    for builder in &builders {
        contributions.extend(builder.contributions());
    }
    let challenge = create_challenge(&context, &nonce, &contributions);

    // The master secret is the same in every credential, so one summed
    // share folds into every proof.
    let mut share_sum = BigUint::zero();
    for participant in &participants {
        let cipher = match participant.transport.get_response(&challenge) {
            Ok(cipher) => cipher,
            Err(e) => {
                session.keyshare_error(e);
                return;
            }
        };
        share_sum += participant.enrollment.private_key.decrypt(&cipher);
    }

    let mut proofs = Vec::with_capacity(builders.len());
    for builder in &builders {
        match builder.create_proof(&challenge) {
            Ok(mut proof) => {
                proof.merge_keyshare_response(&share_sum);
                proofs.push(proof);
            }
            Err(e) => {
                session.keyshare_error(e.into());
                return;
            }
        }
    }

    session.keyshare_done(proofs);
}

/// PIN loop for one server: retry while attempts remain, bail out on
/// lockout or dialog cancellation.
fn verify_pin(
    session: &dyn KeyshareSessionHandler,
    ui: &dyn Handler,
    participant: &KeyshareParticipant,
) -> bool {
    let mut remaining_attempts: i32 = -1;
    loop {
        let (sender, receiver) = mpsc::channel();
        ui.request_pin(remaining_attempts, PinCallback { sender });
        let pin = match receiver.recv() {
            Ok(Some(pin)) => pin,
            Ok(None) | Err(_) => {
                session.keyshare_cancelled();
                return false;
            }
        };
        match participant
            .transport
            .verify_pin(&participant.enrollment.username, &pin)
        {
            Err(e) => {
                session.keyshare_error(e);
                return false;
            }
            Ok(PinStatus::Success) => return true,
            Ok(PinStatus::Failure {
                remaining_attempts: remaining,
            }) => {
                remaining_attempts = remaining as i32;
            }
            Ok(PinStatus::Blocked { duration }) => {
                session.keyshare_blocked(&participant.id, duration);
                session.keyshare_error(SessionError::with_info(
                    ErrorKind::Keyshare,
                    format!("account blocked for {} seconds", duration),
                ));
                return false;
            }
        }
    }
}
