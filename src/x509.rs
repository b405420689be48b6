use crate::error::{Error, Result};
use crate::extensions::{KeyIdentifier, KeyUsageBits};
use crate::key::KeyPair;
use crate::types::{SanEntry, COMMON_NAME};
use chrono::{DateTime, Utc};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{Any, BitString};
use der::pem::LineEnding;
use der::{Decode, Encode, EncodePem};
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPublicKey;
use sha2::Sha512;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_cert::certificate::TbsCertificate;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{self, KeyUsage};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;
use x509_parser::pem::Pem;

pub const SHA512_WITH_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

pub const SERIAL_LENGTH: usize = 20;

const PEM_LABEL: &str = "CERTIFICATE";

/// sha512WithRSAEncryption with the NULL parameters RFC 4055 asks for.
pub fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: SHA512_WITH_RSA_ENCRYPTION,
        parameters: Some(Any::null()),
    }
}

/// Random positive 160-bit serial. The top bit is cleared so the INTEGER
/// stays positive and the next one is set so it is never zero and always
/// encodes in exactly 20 bytes.
pub fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; SERIAL_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7F) | 0x40;
    Ok(SerialNumber::new(&bytes)?)
}

/// A signed X.509 v3 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    inner: x509_cert::Certificate,
}

impl Certificate {
    /// Signs `tbs` with SHA-512 RSA PKCS#1 v1.5.
    pub(crate) fn sign(tbs: TbsCertificate, signer: &KeyPair) -> Result<Self> {
        let tbs_der = tbs.to_der()?;
        let signing_key = SigningKey::<Sha512>::new(signer.private_key().clone());
        let signature = signing_key
            .try_sign(&tbs_der)
            .map_err(|e| Error::Signing(e.to_string()))?;

        Ok(Self {
            inner: x509_cert::Certificate {
                tbs_certificate: tbs,
                signature_algorithm: signature_algorithm(),
                signature: BitString::from_bytes(&signature.to_bytes())?,
            },
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = x509_cert::Certificate::from_der(der).map_err(|e| Error::CertParse(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Parses the first CERTIFICATE block of `pem`. Other blocks, such as a
    /// private key in a combined file, are skipped.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = certificate_blocks(pem)
            .next()
            .ok_or_else(|| Error::CertParse("no CERTIFICATE block found".into()))??;
        Self::from_der(&der)
    }

    /// Parses every CERTIFICATE block of `pem`, in file order.
    pub fn all_from_pem(pem: &str) -> Result<Vec<Self>> {
        certificate_blocks(pem)
            .map(|der| Self::from_der(&der?))
            .collect()
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.to_der()?)
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(self.inner.to_pem(LineEnding::LF)?)
    }

    pub fn as_x509(&self) -> &x509_cert::Certificate {
        &self.inner
    }

    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn serial_hex(&self) -> String {
        let hex: Vec<String> = self.serial_number().iter().map(|b| format!("{:02X}", b)).collect();
        hex.join(":")
    }

    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    pub fn common_name(&self) -> Option<String> {
        self.subject()
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .find(|attr| attr.oid == COMMON_NAME)
            .and_then(|attr| std::str::from_utf8(attr.value.value()).ok())
            .map(str::to_string)
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject() == self.issuer()
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.tbs_certificate.subject_public_key_info
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let der = self.public_key_info().to_der()?;
        Ok(RsaPublicKey::from_public_key_der(&der)?)
    }

    pub fn signature_algorithm_oid(&self) -> ObjectIdentifier {
        self.inner.signature_algorithm.oid
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        to_datetime(&self.inner.tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        to_datetime(&self.inner.tbs_certificate.validity.not_after)
    }

    pub fn extensions(&self) -> &[Extension] {
        self.inner.tbs_certificate.extensions.as_deref().unwrap_or(&[])
    }

    pub fn extension(&self, oid: ObjectIdentifier) -> Option<&Extension> {
        self.extensions().iter().find(|ext| ext.extn_id == oid)
    }

    fn decode_extension<T>(&self) -> Result<Option<T>>
    where
        T: AssociatedOid + for<'a> Decode<'a>,
    {
        self.extension(T::OID)
            .map(|ext| T::from_der(ext.extn_value.as_bytes()).map_err(|e| Error::CertParse(e.to_string())))
            .transpose()
    }

    pub fn is_ca(&self) -> Result<bool> {
        Ok(self
            .decode_extension::<pkix::BasicConstraints>()?
            .map(|bc| bc.ca)
            .unwrap_or(false))
    }

    pub fn key_usage(&self) -> Result<Option<KeyUsageBits>> {
        Ok(self
            .decode_extension::<KeyUsage>()?
            .map(|usage| KeyUsageBits::from_flags(usage.0)))
    }

    pub fn extended_key_usage(&self) -> Result<Vec<ObjectIdentifier>> {
        Ok(self
            .decode_extension::<pkix::ExtendedKeyUsage>()?
            .map(|eku| eku.0)
            .unwrap_or_default())
    }

    pub fn subject_key_id(&self) -> Result<Option<KeyIdentifier>> {
        Ok(self
            .decode_extension::<pkix::SubjectKeyIdentifier>()?
            .map(|ski| KeyIdentifier::from_bytes(ski.0.as_bytes())))
    }

    pub fn authority_key_id(&self) -> Result<Option<KeyIdentifier>> {
        Ok(self
            .decode_extension::<pkix::AuthorityKeyIdentifier>()?
            .and_then(|aki| aki.key_identifier)
            .map(|id| KeyIdentifier::from_bytes(id.as_bytes())))
    }

    /// SAN entries in certificate order. Name forms other than DNS and IP are
    /// skipped.
    pub fn subject_alt_names(&self) -> Result<Vec<SanEntry>> {
        let Some(san) = self.decode_extension::<pkix::SubjectAltName>()? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(san.0.len());
        for name in san.0 {
            match name {
                GeneralName::DnsName(dns) => entries.push(SanEntry::Dns(dns.to_string())),
                GeneralName::IpAddress(octets) => entries.push(SanEntry::Ip(ip_from_octets(octets.as_bytes())?)),
                _ => {}
            }
        }
        Ok(entries)
    }

    /// Checks the signature against `issuer`'s public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer() != issuer.subject() {
            return Err(Error::Verification(format!(
                "issuer '{}' does not match '{}'",
                self.issuer(),
                issuer.subject()
            )));
        }
        self.verify_with_key(&issuer.public_key()?)
    }

    pub fn verify_with_key(&self, public_key: &RsaPublicKey) -> Result<()> {
        if self.signature_algorithm_oid() != SHA512_WITH_RSA_ENCRYPTION {
            return Err(Error::Verification(format!(
                "unsupported signature algorithm {}",
                self.signature_algorithm_oid()
            )));
        }

        let tbs_der = self.inner.tbs_certificate.to_der()?;
        let signature = Signature::try_from(self.inner.signature.raw_bytes())
            .map_err(|e| Error::Verification(e.to_string()))?;
        VerifyingKey::<Sha512>::new(public_key.clone())
            .verify(&tbs_der, &signature)
            .map_err(|e| Error::Verification(e.to_string()))
    }
}

impl From<x509_cert::Certificate> for Certificate {
    fn from(inner: x509_cert::Certificate) -> Self {
        Self { inner }
    }
}

fn to_datetime(time: &Time) -> DateTime<Utc> {
    let since_epoch = time.to_unix_duration();
    DateTime::from_timestamp(since_epoch.as_secs() as i64, 0).unwrap_or_default()
}

fn ip_from_octets(octets: &[u8]) -> Result<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(octets) {
        return Ok(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(octets) {
        return Ok(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    Err(Error::CertParse(format!("IP address SAN has {} octets", octets.len())))
}

// DER contents of each CERTIFICATE block, in order.
fn certificate_blocks(text: &str) -> impl Iterator<Item = Result<Vec<u8>>> + '_ {
    Pem::iter_from_buffer(text.as_bytes()).filter_map(|block| match block {
        Ok(pem) if pem.label == PEM_LABEL => Some(Ok(pem.contents)),
        Ok(_) => None,
        Err(e) => Some(Err(Error::CertParse(format!("invalid PEM: {:?}", e)))),
    })
}
