//! certforge - a small internal PKI for RSA certificates
//!
//! This library issues one self-signed root Certificate Authority and any
//! number of leaf certificates signed by it, and writes them to disk in a
//! layout TLS servers and clients can load directly:
//!
//! - RSA key generation with a configurable public exponent and modulus size
//! - SHA-512 with RSA signatures, X.509 v3 with SAN, Basic Constraints, Key
//!   Usage, Subject/Authority Key Identifier and Extended Key Usage
//! - Key, certificate, combined PEM and chain files per artifact
//! - Batch issuance driven by layered JSON/environment settings
//! - Inspection and verification of issued certificates
//!
//! # Examples
//!
//! ## Creating a Root CA
//!
//! ```no_run
//! use certforge::ca::CertificateAuthority;
//! use certforge::cert::CertificateBuilder;
//!
//! let request = CertificateBuilder::root("ca.example.com")
//!     .with_dns_san("ca.example.com")
//!     .with_validity_days(3650)
//!     .build()
//!     .unwrap();
//!
//! let ca = CertificateAuthority::new_root(&request).unwrap();
//! ca.save_pem("ca.crt", "ca.key").unwrap();
//! ```
//!
//! ## Issuing a Leaf Certificate
//!
//! ```no_run
//! use certforge::ca::CertificateAuthority;
//! use certforge::cert::CertificateBuilder;
//! use certforge::export::{ArtifactExporter, ArtifactNaming};
//!
//! let ca = CertificateAuthority::load_pem("tls/ca.crt", "tls/ca.key").unwrap();
//!
//! let issued = CertificateBuilder::leaf("service.example.com")
//!     .with_dns_san("service.example.com")
//!     .with_ip_san("10.0.0.5")
//!     .with_validity_days(365)
//!     .issue(&ca)
//!     .unwrap();
//!
//! ArtifactExporter::new("tls", ArtifactNaming::default())
//!     .export("service", &issued.key_pair, &issued.certificate, Some(ca.certificate()))
//!     .unwrap();
//! ```
//!
//! ## Running a Batch from Settings
//!
//! ```no_run
//! use certforge::config::Settings;
//!
//! let settings = Settings::load(Some("certforge.json".as_ref())).unwrap();
//! let plan = settings.batch().unwrap();
//! let report = settings.orchestrator().issue_plan(plan).unwrap();
//! assert!(report.is_complete());
//! ```

pub mod ca;
pub mod cert;
pub mod config;
pub mod error;
pub mod export;
pub mod extensions;
pub mod inspect;
pub mod key;
pub mod orchestrator;
pub mod types;
pub mod x509;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, Result};

pub use ca::{issue_leaf, issue_root, CertificateAuthority, IssuedCertificate};
pub use cert::CertificateBuilder;
pub use config::{Settings, SettingsLayer};
pub use export::{ArtifactExporter, ArtifactNaming, ArtifactSet};
pub use extensions::{ExtensionPlanner, ExtensionSet, KeyIdentifier};
pub use inspect::{inspect_pem, CertificateSummary, OutputFormat};
pub use key::{KeyPair, KeyParams};
pub use orchestrator::{BatchPlan, BatchReport, ChainBundle, IssuanceOrchestrator, LeafFailure, PlannedLeaf};
pub use types::{IssuanceRequest, RoleFlags, SanEntry, SanSet, SubjectIdentity, ValidityWindow};
pub use x509::Certificate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_leaf_from_root() {
        let ca = CertificateBuilder::root("ca.test.com")
            .with_dns_san("ca.test.com")
            .with_key_length(2048)
            .build()
            .and_then(|request| CertificateAuthority::new_root(&request))
            .unwrap();

        let issued = CertificateBuilder::leaf("service.test.com")
            .with_dns_san("service.test.com")
            .with_ip_san("127.0.0.1")
            .with_key_length(2048)
            .with_validity_days(90)
            .issue(&ca)
            .unwrap();

        assert!(!issued.certificate.is_ca().unwrap());
        issued.certificate.verify_signed_by(ca.certificate()).unwrap();
        assert_eq!(
            issued.certificate.authority_key_id().unwrap(),
            ca.certificate().subject_key_id().unwrap()
        );
    }

    #[test]
    fn test_output_format_parsing() {
        assert!(matches!("pretty".parse::<OutputFormat>(), Ok(OutputFormat::Pretty)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
