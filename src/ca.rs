use crate::error::{Error, Result};
use crate::extensions::{ExtensionPlanner, KeyIdentifier};
use crate::key::KeyPair;
use crate::types::{IssuanceRequest, ValidityWindow};
use crate::x509::{random_serial, signature_algorithm, Certificate};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use x509_cert::certificate::{TbsCertificate, Version};

/// Key and certificate of the authority that signs a leaf.
#[derive(Debug, Clone, Copy)]
pub struct Issuer<'a> {
    pub key_pair: &'a KeyPair,
    pub certificate: &'a Certificate,
}

/// A freshly issued certificate together with the key pair it certifies.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub key_pair: KeyPair,
    pub certificate: Certificate,
}

impl IssuedCertificate {
    pub fn cert_pem(&self) -> Result<String> {
        self.certificate.to_pem()
    }

    pub fn key_pem(&self) -> Result<String> {
        self.key_pair.private_key_pem()
    }
}

pub fn issue_root(request: &IssuanceRequest) -> Result<IssuedCertificate> {
    issue(request, None)
}

pub fn issue_leaf(request: &IssuanceRequest, issuer_key: &KeyPair, issuer_cert: &Certificate) -> Result<IssuedCertificate> {
    issue(
        request,
        Some(Issuer {
            key_pair: issuer_key,
            certificate: issuer_cert,
        }),
    )
}

/// Issues one certificate. Without an issuer the certificate is self-signed,
/// which only a CA request may be.
pub fn issue(request: &IssuanceRequest, issuer: Option<Issuer<'_>>) -> Result<IssuedCertificate> {
    if request.role.is_ca && issuer.is_some() {
        return Err(Error::ExtensionPlanning(
            "CA certificates are self-signed and take no issuer".into(),
        ));
    }

    let key_pair = KeyPair::generate_with(&request.key_params)?;

    let subject = request.subject.to_name()?;
    let issuer_name = match issuer {
        Some(ref issuer) => issuer.certificate.subject().clone(),
        None => subject.clone(),
    };

    let serial_number = random_serial()?;
    let validity = ValidityWindow::starting_now(request.validity_days)?;

    if request.san.is_empty() {
        return Err(Error::EmptySan);
    }

    let subject_public_key_info = key_pair.public_key_info()?;
    let issuer_key_id = match issuer {
        Some(ref issuer) => Some(issuer.certificate.subject_key_id()?.ok_or_else(|| {
            Error::ExtensionPlanning("issuer certificate has no subject key identifier".into())
        })?),
        None => None,
    };
    let plan = ExtensionPlanner::plan(
        request.role,
        KeyIdentifier::from_public_key_info(&subject_public_key_info),
        issuer_key_id.as_ref(),
    )?;

    let signer = match issuer {
        Some(ref issuer) => {
            if !issuer.key_pair.matches(issuer.certificate.public_key_info())? {
                return Err(Error::Signing(
                    "issuer key does not match the issuer certificate's public key".into(),
                ));
            }
            issuer.key_pair
        }
        None => &key_pair,
    };

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number,
        signature: signature_algorithm(),
        issuer: issuer_name,
        validity: validity.to_x509()?,
        subject,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(plan.to_x509(&request.san)?),
    };

    let certificate = Certificate::sign(tbs, signer)?;

    info!(
        subject = %request.subject,
        ca = request.role.is_ca,
        not_after = %validity.not_after(),
        "issued certificate"
    );
    debug!(serial = %certificate.serial_hex(), sans = request.san.len(), "certificate details");

    Ok(IssuedCertificate {
        key_pair,
        certificate,
    })
}

/// A root CA: its key pair and self-signed certificate.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    key_pair: KeyPair,
    certificate: Certificate,
}

impl CertificateAuthority {
    pub fn new_root(request: &IssuanceRequest) -> Result<Self> {
        if !request.role.is_ca {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a CA request",
                request.subject
            )));
        }
        let issued = issue_root(request)?;
        Ok(Self {
            key_pair: issued.key_pair,
            certificate: issued.certificate,
        })
    }

    /// Pairs an existing CA certificate with its key. The key must certify
    /// the certificate's public key and the certificate must be a CA.
    pub fn from_parts(key_pair: KeyPair, certificate: Certificate) -> Result<Self> {
        if !key_pair.matches(certificate.public_key_info())? {
            return Err(Error::Signing(
                "CA key does not match the CA certificate's public key".into(),
            ));
        }
        if !certificate.is_ca()? {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a CA certificate",
                certificate.subject()
            )));
        }
        Ok(Self {
            key_pair,
            certificate,
        })
    }

    pub fn load_pem(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = fs::read_to_string(cert_path.as_ref())?;
        let key_pem = fs::read_to_string(key_path.as_ref())?;

        let ca = Self::from_parts(KeyPair::from_pem(&key_pem)?, Certificate::from_pem(&cert_pem)?)?;
        debug!(path = %cert_path.as_ref().display(), subject = %ca.certificate.subject(), "loaded CA");
        Ok(ca)
    }

    pub fn issue_leaf(&self, request: &IssuanceRequest) -> Result<IssuedCertificate> {
        issue(request, Some(self.issuer()))
    }

    pub fn save_pem(&self, cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<()> {
        fs::write(cert_path, self.certificate.to_pem()?)?;
        fs::write(key_path, self.key_pair.private_key_pem()?)?;
        Ok(())
    }

    pub fn issuer(&self) -> Issuer<'_> {
        Issuer {
            key_pair: &self.key_pair,
            certificate: &self.certificate,
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn cert_pem(&self) -> Result<String> {
        self.certificate.to_pem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyParams;
    use crate::types::{RoleFlags, SanSet, SubjectIdentity};
    use std::sync::OnceLock;

    fn request(cn: &str, role: RoleFlags, days: u32) -> IssuanceRequest {
        IssuanceRequest::new(
            SubjectIdentity::build("US", cn).unwrap(),
            SanSet::from_lists(&[cn], &["127.0.0.1"]).unwrap(),
            days,
            KeyParams::new(65537, 2048),
            role,
        )
    }

    fn test_ca() -> &'static CertificateAuthority {
        static CA: OnceLock<CertificateAuthority> = OnceLock::new();
        CA.get_or_init(|| CertificateAuthority::new_root(&request("ca.test.com", RoleFlags::root(), 30)).unwrap())
    }

    #[test]
    fn test_root_is_self_signed_ca() {
        let ca = test_ca();
        let cert = ca.certificate();

        assert!(cert.is_self_issued());
        assert!(cert.is_ca().unwrap());
        assert!(cert.authority_key_id().unwrap().is_none());
        assert!(cert.extended_key_usage().unwrap().is_empty());
        assert_eq!(
            cert.subject_key_id().unwrap(),
            Some(ca.key_pair().key_identifier().unwrap())
        );
        cert.verify_signed_by(cert).unwrap();
    }

    #[test]
    fn test_leaf_links_to_issuer() {
        let ca = test_ca();
        let leaf = ca
            .issue_leaf(&request("service.test.com", RoleFlags::leaf(true), 1))
            .unwrap();

        assert_eq!(leaf.certificate.issuer(), ca.certificate().subject());
        assert_eq!(
            leaf.certificate.authority_key_id().unwrap(),
            ca.certificate().subject_key_id().unwrap()
        );
        assert!(!leaf.certificate.is_ca().unwrap());
        leaf.certificate.verify_signed_by(ca.certificate()).unwrap();
    }

    #[test]
    fn test_issued_serials_are_distinct() {
        let ca = test_ca();
        let mut serials: Vec<Vec<u8>> = (0..8)
            .map(|i| {
                let leaf = ca
                    .issue_leaf(&request(&format!("node-{i}.test.com"), RoleFlags::leaf(true), 1))
                    .unwrap();
                assert_eq!(leaf.certificate.serial_number().len(), crate::x509::SERIAL_LENGTH);
                leaf.certificate.serial_number().to_vec()
            })
            .collect();
        serials.push(ca.certificate().serial_number().to_vec());
        serials.sort();
        serials.dedup();
        assert_eq!(serials.len(), 9);
    }

    #[test]
    fn test_issued_san_matches_request_order() {
        let ca = test_ca();
        let mut req = request("service.test.com", RoleFlags::leaf(true), 1);
        req.san = SanSet::from_lists(&["service.test.com", "alias.test.com"], &["10.0.0.5", "::1"]).unwrap();

        let leaf = ca.issue_leaf(&req).unwrap();
        assert_eq!(leaf.certificate.subject_alt_names().unwrap(), req.san.entries());
    }

    #[test]
    fn test_leaf_with_mismatched_issuer_key_fails() {
        let ca = test_ca();
        let stranger = KeyPair::generate(65537, 2048).unwrap();
        let err = issue_leaf(
            &request("service.test.com", RoleFlags::leaf(true), 1),
            &stranger,
            ca.certificate(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn test_leaf_without_issuer_fails_planning() {
        let err = issue(&request("service.test.com", RoleFlags::leaf(true), 1), None).unwrap_err();
        assert!(matches!(err, Error::ExtensionPlanning(_)));
    }

    #[test]
    fn test_ca_request_with_issuer_rejected() {
        let ca = test_ca();
        let err = ca
            .issue_leaf(&request("sub.test.com", RoleFlags::root(), 1))
            .unwrap_err();
        assert!(matches!(err, Error::ExtensionPlanning(_)));
    }

    #[test]
    fn test_empty_san_rejected() {
        let mut req = request("service.test.com", RoleFlags::leaf(true), 1);
        req.san = SanSet::new();
        assert!(matches!(test_ca().issue_leaf(&req), Err(Error::EmptySan)));
    }

    #[test]
    fn test_short_key_fails_before_signing() {
        let mut req = request("service.test.com", RoleFlags::leaf(true), 1);
        req.key_params = KeyParams::new(65537, 512);
        assert!(matches!(test_ca().issue_leaf(&req), Err(Error::KeyGeneration(_))));
    }

    #[test]
    fn test_from_parts_rejects_foreign_key() {
        let ca = test_ca();
        let stranger = KeyPair::generate(65537, 2048).unwrap();
        let err = CertificateAuthority::from_parts(stranger, ca.certificate().clone()).unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn test_from_parts_rejects_leaf_certificate() {
        let leaf = test_ca()
            .issue_leaf(&request("service.test.com", RoleFlags::leaf(true), 1))
            .unwrap();
        let err = CertificateAuthority::from_parts(leaf.key_pair, leaf.certificate).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_save_and_load_pem() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.crt");
        let key_path = dir.path().join("ca.key");

        let ca = test_ca();
        ca.save_pem(&cert_path, &key_path).unwrap();

        let loaded = CertificateAuthority::load_pem(&cert_path, &key_path).unwrap();
        assert_eq!(loaded.certificate(), ca.certificate());

        let leaf = loaded
            .issue_leaf(&request("service.test.com", RoleFlags::leaf(true), 1))
            .unwrap();
        leaf.certificate.verify_signed_by(ca.certificate()).unwrap();
    }
}
