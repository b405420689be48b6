//! Extension planning.
//!
//! Root and leaf certificates differ only in their [`RoleFlags`]; the planner
//! turns those flags into the complete extension set, and
//! [`ExtensionSet::to_x509`] encodes it in a fixed order.

use crate::error::{Error, Result};
use crate::types::{RoleFlags, SanSet};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::OctetString;
use der::Encode;
use flagset::FlagSet;
use sha1::{Digest, Sha1};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use x509_cert::ext::pkix::{self, KeyUsages};
use x509_cert::ext::Extension;

pub const ID_KP_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");
pub const ID_KP_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");

/// Key identifier as carried by SKI and AKI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentifier(Vec<u8>);

impl KeyIdentifier {
    /// SHA-1 over the subjectPublicKey BIT STRING (RFC 5280 4.2.1.2, method 1).
    pub fn from_public_key_info(info: &SubjectPublicKeyInfoOwned) -> Self {
        let digest = Sha1::digest(info.subject_public_key.raw_bytes());
        Self(digest.to_vec())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", hex.join(":"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageBits {
    pub digital_signature: bool,
    pub content_commitment: bool,
    pub key_encipherment: bool,
    pub data_encipherment: bool,
    pub key_agreement: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
    pub encipher_only: bool,
    pub decipher_only: bool,
}

impl KeyUsageBits {
    pub(crate) fn to_flags(self) -> FlagSet<KeyUsages> {
        let mut flags = FlagSet::<KeyUsages>::default();
        let bits = [
            (self.digital_signature, KeyUsages::DigitalSignature),
            (self.content_commitment, KeyUsages::NonRepudiation),
            (self.key_encipherment, KeyUsages::KeyEncipherment),
            (self.data_encipherment, KeyUsages::DataEncipherment),
            (self.key_agreement, KeyUsages::KeyAgreement),
            (self.key_cert_sign, KeyUsages::KeyCertSign),
            (self.crl_sign, KeyUsages::CRLSign),
            (self.encipher_only, KeyUsages::EncipherOnly),
            (self.decipher_only, KeyUsages::DecipherOnly),
        ];
        for (set, usage) in bits {
            if set {
                flags |= usage;
            }
        }
        flags
    }

    pub(crate) fn from_flags(flags: FlagSet<KeyUsages>) -> Self {
        Self {
            digital_signature: flags.contains(KeyUsages::DigitalSignature),
            content_commitment: flags.contains(KeyUsages::NonRepudiation),
            key_encipherment: flags.contains(KeyUsages::KeyEncipherment),
            data_encipherment: flags.contains(KeyUsages::DataEncipherment),
            key_agreement: flags.contains(KeyUsages::KeyAgreement),
            key_cert_sign: flags.contains(KeyUsages::KeyCertSign),
            crl_sign: flags.contains(KeyUsages::CRLSign),
            encipher_only: flags.contains(KeyUsages::EncipherOnly),
            decipher_only: flags.contains(KeyUsages::DecipherOnly),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.digital_signature {
            names.push("Digital Signature");
        }
        if self.content_commitment {
            names.push("Content Commitment");
        }
        if self.key_encipherment {
            names.push("Key Encipherment");
        }
        if self.data_encipherment {
            names.push("Data Encipherment");
        }
        if self.key_agreement {
            names.push("Key Agreement");
        }
        if self.key_cert_sign {
            names.push("Certificate Sign");
        }
        if self.crl_sign {
            names.push("CRL Sign");
        }
        if self.encipher_only {
            names.push("Encipher Only");
        }
        if self.decipher_only {
            names.push("Decipher Only");
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsage {
    ClientAuth,
    ServerAuth,
}

impl ExtendedKeyUsage {
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            ExtendedKeyUsage::ClientAuth => ID_KP_CLIENT_AUTH,
            ExtendedKeyUsage::ServerAuth => ID_KP_SERVER_AUTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSet {
    pub is_ca: bool,
    pub path_len: Option<u8>,
    pub key_usage: KeyUsageBits,
    pub subject_key_id: KeyIdentifier,
    pub authority_key_id: Option<KeyIdentifier>,
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
}

impl ExtensionSet {
    /// Encodes SAN, basicConstraints, keyUsage, SKI, EKU and AKI, in that
    /// order. Only basicConstraints and keyUsage are critical.
    pub fn to_x509(&self, san: &SanSet) -> Result<Vec<Extension>> {
        let mut extensions = Vec::with_capacity(6);

        extensions.push(encode(&pkix::SubjectAltName(san.to_general_names()?), false)?);
        extensions.push(encode(
            &pkix::BasicConstraints {
                ca: self.is_ca,
                path_len_constraint: self.path_len,
            },
            true,
        )?);
        extensions.push(encode(&pkix::KeyUsage(self.key_usage.to_flags()), true)?);
        extensions.push(encode(
            &pkix::SubjectKeyIdentifier(OctetString::new(self.subject_key_id.as_bytes())?),
            false,
        )?);

        if !self.extended_key_usage.is_empty() {
            let oids = self.extended_key_usage.iter().map(ExtendedKeyUsage::oid).collect();
            extensions.push(encode(&pkix::ExtendedKeyUsage(oids), false)?);
        }

        if let Some(ref authority) = self.authority_key_id {
            extensions.push(encode(
                &pkix::AuthorityKeyIdentifier {
                    key_identifier: Some(OctetString::new(authority.as_bytes())?),
                    authority_cert_issuer: None,
                    authority_cert_serial_number: None,
                },
                false,
            )?);
        }

        Ok(extensions)
    }
}

fn encode<T: AssociatedOid + Encode>(value: &T, critical: bool) -> Result<Extension> {
    Ok(Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

pub struct ExtensionPlanner;

impl ExtensionPlanner {
    /// Applies the role decision table. A leaf must name its issuer's key
    /// identifier; a CA must be able to sign and a leaf must not.
    pub fn plan(
        role: RoleFlags,
        subject_key_id: KeyIdentifier,
        issuer_key_id: Option<&KeyIdentifier>,
    ) -> Result<ExtensionSet> {
        if role.is_ca && !role.is_cert_signer {
            return Err(Error::ExtensionPlanning(
                "a CA certificate must be a certificate signer".into(),
            ));
        }
        if !role.is_ca && role.is_cert_signer {
            return Err(Error::ExtensionPlanning(
                "a leaf certificate cannot sign certificates".into(),
            ));
        }

        let key_usage = KeyUsageBits {
            digital_signature: true,
            key_encipherment: role.is_key_encipherer,
            key_cert_sign: role.is_cert_signer,
            crl_sign: true,
            ..KeyUsageBits::default()
        };

        if role.is_ca {
            return Ok(ExtensionSet {
                is_ca: true,
                path_len: None,
                key_usage,
                subject_key_id,
                authority_key_id: None,
                extended_key_usage: Vec::new(),
            });
        }

        let authority_key_id = issuer_key_id.cloned().ok_or_else(|| {
            Error::ExtensionPlanning("leaf certificate has no issuer key identifier".into())
        })?;

        Ok(ExtensionSet {
            is_ca: false,
            path_len: None,
            key_usage,
            subject_key_id,
            authority_key_id: Some(authority_key_id),
            extended_key_usage: vec![ExtendedKeyUsage::ClientAuth, ExtendedKeyUsage::ServerAuth],
        })
    }
}
