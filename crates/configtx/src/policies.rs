//! Named signature policies

use crate::{ConfigError, SignatureVerifier};
use orderer_types::{ConfigSignature, Policy, SignaturePolicy};
use std::collections::{BTreeMap, HashSet};

/// Immutable-by-convention set of named policies.
///
/// A new set is built for every configuration update; the previous one
/// stays valid for anything already holding it.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, policy: Policy) {
        self.policies.insert(name, policy);
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Check that `signatures` over `data` satisfy the named policy
    pub fn evaluate(
        &self,
        name: &str,
        data: &[u8],
        signatures: &[ConfigSignature],
        verifier: &dyn SignatureVerifier,
    ) -> Result<(), ConfigError> {
        let policy = self
            .get(name)
            .ok_or_else(|| ConfigError::PolicyNotFound(name.to_string()))?;

        if evaluate_policy(policy, data, signatures, verifier) {
            Ok(())
        } else {
            Err(ConfigError::PolicyNotSatisfied(name.to_string()))
        }
    }
}

/// Evaluate a policy against a set of signatures.
///
/// Every signature is verified once; the rule is then checked against the
/// identities whose signatures verified.
pub fn evaluate_policy(
    policy: &Policy,
    data: &[u8],
    signatures: &[ConfigSignature],
    verifier: &dyn SignatureVerifier,
) -> bool {
    let Policy::Signature(envelope) = policy;

    let signers: HashSet<&[u8]> = signatures
        .iter()
        .filter(|sig| match verifier.verify(&sig.identity, data, &sig.signature) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Ignoring signature: {}", e);
                false
            }
        })
        .map(|sig| sig.identity.as_slice())
        .collect();

    rule_satisfied(&envelope.rule, &envelope.identities, &signers)
}

fn rule_satisfied(rule: &SignaturePolicy, identities: &[Vec<u8>], signers: &HashSet<&[u8]>) -> bool {
    match rule {
        SignaturePolicy::SignedBy(index) => identities
            .get(*index as usize)
            .map(|id| signers.contains(id.as_slice()))
            .unwrap_or(false),
        SignaturePolicy::NOutOf { n, rules } => {
            let satisfied = rules
                .iter()
                .filter(|r| rule_satisfied(r, identities, signers))
                .count();
            satisfied >= *n as usize
        }
    }
}

/// Structural check: indices in range and thresholds reachable
pub fn validate_policy(name: &str, policy: &Policy) -> Result<(), ConfigError> {
    let Policy::Signature(envelope) = policy;
    validate_rule(name, &envelope.rule, envelope.identities.len())
}

fn validate_rule(name: &str, rule: &SignaturePolicy, identity_count: usize) -> Result<(), ConfigError> {
    match rule {
        SignaturePolicy::SignedBy(index) if *index as usize >= identity_count => {
            Err(ConfigError::InvalidPolicy {
                name: name.to_string(),
                reason: format!("SignedBy({}) with {} identities", index, identity_count),
            })
        }
        SignaturePolicy::SignedBy(_) => Ok(()),
        SignaturePolicy::NOutOf { n, rules } => {
            if *n as usize > rules.len() {
                return Err(ConfigError::InvalidPolicy {
                    name: name.to_string(),
                    reason: format!("requires {} of {} rules", n, rules.len()),
                });
            }
            rules
                .iter()
                .try_for_each(|r| validate_rule(name, r, identity_count))
        }
    }
}
