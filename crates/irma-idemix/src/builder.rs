//! Proof builders: the commit / challenge / respond halves of disclosure
//! proofs and issuance commitments, plus the issuance wire messages.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{IdemixError, IdemixResult};
use crate::key::PublicKey;
use crate::params::random_big_int;
use crate::proof::{Proof, ProofD, ProofU, SECRET_ATTRIBUTE_INDEX};
use crate::signature::CLSignature;

/// First message of the issuance protocol: the user's commitments plus the
/// second nonce under which the issuer must respond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommitmentMessage {
    pub combined_proofs: Vec<Proof>,
    pub nonce2: BigUint,
}

/// Issuer's reply: one partial CL signature per requested credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSignatureMessage {
    pub signature: CLSignature,
}

// ---------------------------------------------------------------------------
// DisclosureProofBuilder
// ---------------------------------------------------------------------------

/// Builds a disclosure proof over one credential. Usage is strictly
/// `commit` -> (optional keyshare blending) -> `create_proof`.
#[derive(Debug, Clone)]
pub struct DisclosureProofBuilder {
    pk: PublicKey,
    signature: CLSignature,
    attributes: Vec<BigUint>,
    disclosed: BTreeSet<usize>,
    randomizers: Option<DisclosureRandomizers>,
}

#[derive(Debug, Clone)]
struct DisclosureRandomizers {
    e_commit: BigUint,
    v_commit: BigUint,
    a_commits: BTreeMap<usize, BigUint>,
    z_commit: BigUint,
}

impl DisclosureProofBuilder {
    pub fn new(
        pk: PublicKey,
        signature: CLSignature,
        attributes: Vec<BigUint>,
        disclosed: BTreeSet<usize>,
    ) -> IdemixResult<Self> {
        if attributes.len() > pk.max_attributes() {
            return Err(IdemixError::AttributeCountMismatch);
        }
        Ok(Self {
            pk,
            signature,
            attributes,
            disclosed,
            randomizers: None,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    fn hidden(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.attributes.len()).filter(move |i| !self.disclosed.contains(i))
    }

    /// Sample witnesses and compute this builder's challenge contributions.
    pub fn commit(&mut self) -> IdemixResult<Vec<BigUint>> {
        if self.randomizers.is_some() {
            return Err(IdemixError::BuilderState("commit called twice".into()));
        }
        let params = self.pk.params();
        let e_commit = random_big_int(params.l_e_commit());
        let v_commit = random_big_int(params.l_v_commit());
        let mut a_commits = BTreeMap::new();

        let mut z_commit = self.signature.a.modpow(&e_commit, &self.pk.n);
        z_commit = z_commit * self.pk.s.modpow(&v_commit, &self.pk.n) % &self.pk.n;
        for i in self.hidden().collect::<Vec<_>>() {
            let w = random_big_int(params.l_m_commit());
            z_commit = z_commit * self.pk.r[i].modpow(&w, &self.pk.n) % &self.pk.n;
            a_commits.insert(i, w);
        }

        self.randomizers = Some(DisclosureRandomizers {
            e_commit,
            v_commit,
            a_commits,
            z_commit,
        });
        Ok(self.contributions())
    }

    /// Contributions to the shared Fiat-Shamir hash, valid after `commit`.
    pub fn contributions(&self) -> Vec<BigUint> {
        match &self.randomizers {
            Some(r) => vec![self.signature.a.clone(), r.z_commit.clone()],
            None => Vec::new(),
        }
    }

    /// Blend a keyshare server's commitment into the committed value.
    pub fn set_keyshare_commitment(&mut self, w: &BigUint) -> IdemixResult<()> {
        let r = self
            .randomizers
            .as_mut()
            .ok_or_else(|| IdemixError::BuilderState("keyshare blend before commit".into()))?;
        r.z_commit = &r.z_commit * (w % &self.pk.n) % &self.pk.n;
        Ok(())
    }

    pub fn create_proof(&self, challenge: &BigUint) -> IdemixResult<Proof> {
        let r = self
            .randomizers
            .as_ref()
            .ok_or_else(|| IdemixError::BuilderState("create_proof before commit".into()))?;

        let e_response = &r.e_commit + challenge * &self.signature.e;
        let v_response = &r.v_commit + challenge * &self.signature.v;
        let mut a_responses = BTreeMap::new();
        for (i, w) in &r.a_commits {
            a_responses.insert(*i, w + challenge * &self.attributes[*i]);
        }
        let mut a_disclosed = BTreeMap::new();
        for i in &self.disclosed {
            a_disclosed.insert(*i, self.attributes[*i].clone());
        }

        Ok(Proof::Disclosure(ProofD {
            c: challenge.clone(),
            a: self.signature.a.clone(),
            e_response,
            v_response,
            a_responses,
            a_disclosed,
        }))
    }
}

// ---------------------------------------------------------------------------
// CredentialBuilder
// ---------------------------------------------------------------------------

/// Builds the commitment `U = S^v' * R_secret^secret` for one credential to
/// be issued, proves knowledge of its openings, and later completes the
/// issuer's partial signature into a full one.
#[derive(Debug, Clone)]
pub struct CredentialBuilder {
    pk: PublicKey,
    secret: BigUint,
    v_prime: BigUint,
    u: BigUint,
    randomizers: Option<IssuanceRandomizers>,
}

#[derive(Debug, Clone)]
struct IssuanceRandomizers {
    s_commit: BigUint,
    v_prime_commit: BigUint,
    u_commit: BigUint,
}

impl CredentialBuilder {
    pub fn new(pk: PublicKey, secret: BigUint) -> IdemixResult<Self> {
        if pk.base(SECRET_ATTRIBUTE_INDEX).is_none() {
            return Err(IdemixError::AttributeCountMismatch);
        }
        let params = pk.params();
        let v_prime = random_big_int(params.l_v);
        let u = pk.s.modpow(&v_prime, &pk.n)
            * pk.r[SECRET_ATTRIBUTE_INDEX].modpow(&secret, &pk.n)
            % &pk.n;
        Ok(Self {
            pk,
            secret,
            v_prime,
            u,
            randomizers: None,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    pub fn commitment(&self) -> &BigUint {
        &self.u
    }

    pub fn commit(&mut self) -> IdemixResult<Vec<BigUint>> {
        if self.randomizers.is_some() {
            return Err(IdemixError::BuilderState("commit called twice".into()));
        }
        let params = self.pk.params();
        let s_commit = random_big_int(params.l_m_commit());
        let v_prime_commit = random_big_int(params.l_v_commit());
        let u_commit = self.pk.s.modpow(&v_prime_commit, &self.pk.n)
            * self.pk.r[SECRET_ATTRIBUTE_INDEX].modpow(&s_commit, &self.pk.n)
            % &self.pk.n;
        self.randomizers = Some(IssuanceRandomizers {
            s_commit,
            v_prime_commit,
            u_commit,
        });
        Ok(self.contributions())
    }

    pub fn contributions(&self) -> Vec<BigUint> {
        match &self.randomizers {
            Some(r) => vec![self.u.clone(), r.u_commit.clone()],
            None => Vec::new(),
        }
    }

    pub fn set_keyshare_commitment(&mut self, w: &BigUint) -> IdemixResult<()> {
        let r = self
            .randomizers
            .as_mut()
            .ok_or_else(|| IdemixError::BuilderState("keyshare blend before commit".into()))?;
        r.u_commit = &r.u_commit * (w % &self.pk.n) % &self.pk.n;
        Ok(())
    }

    pub fn create_proof(&self, challenge: &BigUint) -> IdemixResult<Proof> {
        let r = self
            .randomizers
            .as_ref()
            .ok_or_else(|| IdemixError::BuilderState("create_proof before commit".into()))?;
        Ok(Proof::IssuanceCommitment(ProofU {
            u: self.u.clone(),
            c: challenge.clone(),
            v_prime_response: &r.v_prime_commit + challenge * &self.v_prime,
            s_response: &r.s_commit + challenge * &self.secret,
        }))
    }

    /// Complete the issuer's partial signature: the blinding halves add up,
    /// and the result must verify over the full attribute vector (with the
    /// master secret at its fixed position).
    pub fn construct_credential(
        &self,
        msg: &IssueSignatureMessage,
        attributes: &[BigUint],
    ) -> IdemixResult<CLSignature> {
        let signature = CLSignature {
            a: msg.signature.a.clone(),
            e: msg.signature.e.clone(),
            v: &msg.signature.v + &self.v_prime,
            keyshare_p: msg.signature.keyshare_p.clone(),
        };
        if !signature.verify(&self.pk, attributes) {
            return Err(IdemixError::InvalidSignature);
        }
        Ok(signature)
    }
}

// ---------------------------------------------------------------------------
// ProofBuilder -- either kind, behind one dispatch surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProofBuilder {
    Disclosure(DisclosureProofBuilder),
    Credential(CredentialBuilder),
}

impl ProofBuilder {
    pub fn commit(&mut self) -> IdemixResult<Vec<BigUint>> {
        match self {
            ProofBuilder::Disclosure(b) => b.commit(),
            ProofBuilder::Credential(b) => b.commit(),
        }
    }

    pub fn contributions(&self) -> Vec<BigUint> {
        match self {
            ProofBuilder::Disclosure(b) => b.contributions(),
            ProofBuilder::Credential(b) => b.contributions(),
        }
    }

    pub fn set_keyshare_commitment(&mut self, w: &BigUint) -> IdemixResult<()> {
        match self {
            ProofBuilder::Disclosure(b) => b.set_keyshare_commitment(w),
            ProofBuilder::Credential(b) => b.set_keyshare_commitment(w),
        }
    }

    pub fn create_proof(&self, challenge: &BigUint) -> IdemixResult<Proof> {
        match self {
            ProofBuilder::Disclosure(b) => b.create_proof(challenge),
            ProofBuilder::Credential(b) => b.create_proof(challenge),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        match self {
            ProofBuilder::Disclosure(b) => b.public_key(),
            ProofBuilder::Credential(b) => b.public_key(),
        }
    }
}

/// Run the full commit / challenge / respond round over an ordered builder
/// list, deriving the challenge exactly once.
pub fn build_proof_list(
    context: &BigUint,
    nonce: &BigUint,
    builders: &mut [ProofBuilder],
) -> IdemixResult<Vec<Proof>> {
    let mut contributions = Vec::new();
    for b in builders.iter_mut() {
        contributions.extend(b.commit()?);
    }
    let challenge = crate::proof::create_challenge(context, nonce, &contributions);
    builders.iter().map(|b| b.create_proof(&challenge)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::TestIssuer;
    use crate::params::random_big_int;

    fn attribute_vector(issuer: &TestIssuer, secret: &BigUint) -> Vec<BigUint> {
        let mut attrs = vec![random_big_int(64), secret.clone()];
        while attrs.len() < issuer.public_key().max_attributes() {
            attrs.push(random_big_int(64));
        }
        attrs
    }

    #[test]
    fn test_disclosure_builder_round() {
        let issuer = TestIssuer::new(4);
        let secret = random_big_int(128);
        let attrs = attribute_vector(&issuer, &secret);
        let sig = issuer.sign(&attrs);

        let mut builder = DisclosureProofBuilder::new(
            issuer.public_key().clone(),
            sig,
            attrs.clone(),
            [0usize, 2].into_iter().collect(),
        )
        .unwrap();

        let contributions = builder.commit().unwrap();
        assert_eq!(contributions.len(), 2);

        let challenge = BigUint::from(97u32);
        let proof = builder.create_proof(&challenge).unwrap();
        match proof {
            Proof::Disclosure(p) => {
                assert_eq!(p.c, challenge);
                assert_eq!(p.a_disclosed.len(), 2);
                assert_eq!(p.a_disclosed[&0], attrs[0]);
                assert_eq!(p.a_disclosed[&2], attrs[2]);
                // secret and attribute 3 stay hidden
                assert!(p.a_responses.contains_key(&SECRET_ATTRIBUTE_INDEX));
                assert!(p.a_responses.contains_key(&3));
                assert!(!p.a_responses.contains_key(&0));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_disclosure_builder_rejects_double_commit() {
        let issuer = TestIssuer::new(2);
        let attrs = vec![random_big_int(64), random_big_int(64)];
        let sig = issuer.sign(&attrs);
        let mut builder = DisclosureProofBuilder::new(
            issuer.public_key().clone(),
            sig,
            attrs,
            BTreeSet::new(),
        )
        .unwrap();
        builder.commit().unwrap();
        assert!(builder.commit().is_err());
    }

    #[test]
    fn test_proof_before_commit_fails() {
        let issuer = TestIssuer::new(2);
        let attrs = vec![random_big_int(64), random_big_int(64)];
        let sig = issuer.sign(&attrs);
        let builder =
            DisclosureProofBuilder::new(issuer.public_key().clone(), sig, attrs, BTreeSet::new())
                .unwrap();
        assert!(builder.create_proof(&BigUint::from(1u32)).is_err());
    }

    #[test]
    fn test_issuance_commit_and_construct() {
        let issuer = TestIssuer::new(4);
        let secret = random_big_int(128);

        let mut builder =
            CredentialBuilder::new(issuer.public_key().clone(), secret.clone()).unwrap();
        let contributions = builder.commit().unwrap();
        assert_eq!(contributions.len(), 2);
        assert_eq!(&contributions[0], builder.commitment());

        let proof = builder.create_proof(&BigUint::from(11u32)).unwrap();
        let u = match &proof {
            Proof::IssuanceCommitment(p) => p.u.clone(),
            _ => unreachable!(),
        };

        let attrs = attribute_vector(&issuer, &secret);
        let msg = issuer.issue_from_commitment(&u, &attrs);
        let signature = builder.construct_credential(&msg, &attrs).unwrap();
        assert!(signature.verify(issuer.public_key(), &attrs));
    }

    #[test]
    fn test_construct_credential_rejects_tampered_message() {
        let issuer = TestIssuer::new(3);
        let secret = random_big_int(128);
        let mut builder =
            CredentialBuilder::new(issuer.public_key().clone(), secret.clone()).unwrap();
        builder.commit().unwrap();

        let attrs = attribute_vector(&issuer, &secret);
        let mut msg = issuer.issue_from_commitment(builder.commitment(), &attrs);
        msg.signature.v += 1u32;
        assert!(builder.construct_credential(&msg, &attrs).is_err());
    }

    #[test]
    fn test_keyshare_commitment_changes_contribution() {
        let issuer = TestIssuer::new(3);
        let secret = random_big_int(128);
        let mut builder =
            CredentialBuilder::new(issuer.public_key().clone(), secret).unwrap();
        let before = builder.commit().unwrap();
        builder
            .set_keyshare_commitment(&BigUint::from(12345u32))
            .unwrap();
        let after = builder.contributions();
        assert_eq!(before[0], after[0]);
        assert_ne!(before[1], after[1]);
    }

    #[test]
    fn test_build_proof_list_shares_one_challenge() {
        let issuer = TestIssuer::new(4);
        let secret = random_big_int(128);
        let attrs = attribute_vector(&issuer, &secret);
        let sig = issuer.sign(&attrs);

        let mut builders = vec![
            ProofBuilder::Disclosure(
                DisclosureProofBuilder::new(
                    issuer.public_key().clone(),
                    sig,
                    attrs,
                    [0usize].into_iter().collect(),
                )
                .unwrap(),
            ),
            ProofBuilder::Credential(
                CredentialBuilder::new(issuer.public_key().clone(), secret).unwrap(),
            ),
        ];

        let proofs = build_proof_list(
            &BigUint::from(7u32),
            &BigUint::from(13u32),
            &mut builders,
        )
        .unwrap();
        assert_eq!(proofs.len(), 2);
        let c0 = match &proofs[0] {
            Proof::Disclosure(p) => p.c.clone(),
            _ => unreachable!(),
        };
        let c1 = match &proofs[1] {
            Proof::IssuanceCommitment(p) => p.c.clone(),
            _ => unreachable!(),
        };
        assert_eq!(c0, c1);
    }
}
