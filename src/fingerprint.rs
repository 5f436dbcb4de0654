//! Content fingerprints for forms, denotators and address values.
//!
//! Provides deterministic hashing with domain separation and length prefixing,
//! so that identical content yields identical fingerprints across fresh builds
//! and processes. Form fingerprints are cached on the form
//! ([`FormArena::fingerprint`](crate::arena::FormArena)); denotator fingerprints
//! are Merkle hashes over the factor tree.
//!
//! # Citations
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation & length prefixing: Bernstein et al., "How to hash into elliptic curves" (2009)
//! - Merkle trees: Merkle, "A digital signature based on a conventional encryption function" (1987)

use crate::address::{Module, ModuleElement, ModuleMorphism};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain tags for the different hashed objects.
pub mod domains {
    /// Form definitions.
    pub const FORM: &[u8] = b"FORM";
    /// Denotator trees.
    pub const DENOTATOR: &[u8] = b"DENOTATOR";
    /// Address-algebra leaves.
    pub const LEAF: &[u8] = b"LEAF";
}

/// A 256‑bit hash value.
///
/// Wraps a byte array for type safety.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(pub [u8; 32]);

impl HashValue {
    /// Creates a zero hash (all zeros).
    #[inline]
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a raw byte array.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw byte array.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes SHA‑256 of the given data with domain separation.
    ///
    /// Domain separation prefix is applied as `b"DNT:<domain>:v1" || length_prefix(data) || data`.
    /// Length prefix is a 64‑bit little‑endian count of bytes.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"DNT:");
        hasher.update(domain);
        hasher.update(b":v1");
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Lower-case hex rendering of all 32 bytes.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for HashValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // first 4 bytes are enough to tell values apart in logs
        write!(
            f,
            "HashValue({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Appends a 64-bit little-endian length.
#[inline]
pub fn push_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

/// Appends a length-prefixed UTF-8 string.
#[inline]
pub fn push_str(out: &mut Vec<u8>, s: &str) {
    push_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

/// Values with an unambiguous byte encoding.
///
/// The encoding is injective: distinct values never share bytes. It starts
/// with the length-prefixed type tag of the value.
pub trait Canonicalizable {
    /// Appends the canonical encoding of `self` to `out`.
    fn canonical_bytes(&self, out: &mut Vec<u8>);

    /// Hash of the canonical encoding.
    fn content_hash(&self) -> HashValue {
        let mut bytes = Vec::new();
        self.canonical_bytes(&mut bytes);
        HashValue::hash_with_domain(domains::LEAF, &bytes)
    }
}

impl Canonicalizable for Module {
    fn canonical_bytes(&self, out: &mut Vec<u8>) {
        push_str(out, self.tag());
        match self {
            Module::Zn(n) => out.extend_from_slice(&n.to_le_bytes()),
            Module::Product(factors) => {
                push_len(out, factors.len());
                for factor in factors {
                    factor.canonical_bytes(out);
                }
            }
            Module::Null | Module::Z | Module::Q | Module::R => {}
        }
    }
}

impl Canonicalizable for ModuleElement {
    fn canonical_bytes(&self, out: &mut Vec<u8>) {
        push_str(out, self.tag());
        match self {
            ModuleElement::Null => {}
            ModuleElement::Z(v) => out.extend_from_slice(&v.to_le_bytes()),
            ModuleElement::Zn { value, modulus } => {
                out.extend_from_slice(&modulus.to_le_bytes());
                out.extend_from_slice(&value.to_le_bytes());
            }
            ModuleElement::Q(q) => {
                out.extend_from_slice(&q.numer().to_le_bytes());
                out.extend_from_slice(&q.denom().to_le_bytes());
            }
            ModuleElement::R(r) => out.extend_from_slice(&r.to_bits().to_le_bytes()),
            ModuleElement::Product(xs) => {
                push_len(out, xs.len());
                for x in xs {
                    x.canonical_bytes(out);
                }
            }
        }
    }
}

impl Canonicalizable for ModuleMorphism {
    fn canonical_bytes(&self, out: &mut Vec<u8>) {
        push_str(out, self.tag());
        match self {
            ModuleMorphism::Constant { domain, value } => {
                domain.canonical_bytes(out);
                value.canonical_bytes(out);
            }
            ModuleMorphism::Identity(module) => module.canonical_bytes(out),
            ModuleMorphism::Affine {
                ring,
                factor,
                shift,
            } => {
                ring.canonical_bytes(out);
                factor.canonical_bytes(out);
                shift.canonical_bytes(out);
            }
            ModuleMorphism::Embedding { domain, codomain } => {
                domain.canonical_bytes(out);
                codomain.canonical_bytes(out);
            }
            ModuleMorphism::Composition(f, g) => {
                f.canonical_bytes(out);
                g.canonical_bytes(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation() {
        let data = b"payload";
        assert_ne!(
            HashValue::hash_with_domain(domains::FORM, data),
            HashValue::hash_with_domain(domains::DENOTATOR, data)
        );
        assert_eq!(
            HashValue::hash_with_domain(domains::FORM, data),
            HashValue::hash_with_domain(domains::FORM, data)
        );
    }

    #[test]
    fn length_prefix_disambiguates_concatenation() {
        let mut ab_c = Vec::new();
        push_str(&mut ab_c, "ab");
        push_str(&mut ab_c, "c");
        let mut a_bc = Vec::new();
        push_str(&mut a_bc, "a");
        push_str(&mut a_bc, "bc");
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn leaf_hashes_distinguish_kinds() {
        assert_ne!(
            ModuleElement::Z(1).content_hash(),
            ModuleElement::zn(1, 2).content_hash()
        );
        assert_ne!(Module::Z.content_hash(), Module::Zn(0).content_hash());
        assert_eq!(
            Module::Product(vec![Module::Z, Module::R]).content_hash(),
            Module::Product(vec![Module::Z, Module::R]).content_hash()
        );
    }

    #[test]
    fn hex_rendering() {
        let hash = HashValue::from_bytes([0xab; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_hex().starts_with("abab"));
        assert_eq!(hash.to_string(), "HashValue(abababab…)");
    }
}
