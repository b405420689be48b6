//! Integration tests for certforge.
//!
//! These tests run whole issuance workflows against a temporary directory.

use certforge::ca::{issue_root, CertificateAuthority};
use certforge::cert::CertificateBuilder;
use certforge::config::SettingsLayer;
use certforge::error::{Error, Result};
use certforge::export::{ArtifactExporter, ArtifactNaming};
use certforge::extensions::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use certforge::inspect::inspect_pem;
use certforge::types::SanEntry;
use certforge::x509::{Certificate, SHA512_WITH_RSA_ENCRYPTION};
use certforge::KeyPair;
use std::fs;
use tempfile::TempDir;

fn test_ca() -> Result<CertificateAuthority> {
    let request = CertificateBuilder::root("ca.test.com")
        .with_dns_san("ca.test.com")
        .with_key_length(2048)
        .with_validity_days(1)
        .with_artifact_name("ca")
        .build()?;
    CertificateAuthority::new_root(&request)
}

#[test]
fn test_root_and_leaf_workflow() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let exporter = ArtifactExporter::new(temp_dir.path(), ArtifactNaming::default());

    // 1. Root CA
    let ca = test_ca()?;
    exporter.export("ca", ca.key_pair(), ca.certificate(), None)?;
    assert!(ca.certificate().is_ca()?);
    assert!(ca.certificate().is_self_issued());
    assert!(ca.certificate().authority_key_id()?.is_none());
    assert!(ca.certificate().extended_key_usage()?.is_empty());

    // 2. Leaf signed by the root
    let request = CertificateBuilder::leaf("service.test.com")
        .with_dns_san("service.test.com")
        .with_ip_san("127.0.0.1")
        .with_key_length(2048)
        .with_validity_days(1)
        .build()?;
    let leaf = ca.issue_leaf(&request)?;
    let artifacts = exporter.export(
        &request.artifact_name,
        &leaf.key_pair,
        &leaf.certificate,
        Some(ca.certificate()),
    )?;

    // 3. Certificate contents
    let cert = &leaf.certificate;
    cert.verify_signed_by(ca.certificate())?;
    assert_eq!(cert.signature_algorithm_oid(), SHA512_WITH_RSA_ENCRYPTION);
    assert_eq!(cert.common_name().as_deref(), Some("service.test.com"));
    assert!(!cert.is_ca()?);
    assert_eq!(cert.authority_key_id()?, ca.certificate().subject_key_id()?);

    let sans = cert.subject_alt_names()?;
    assert_eq!(sans, request.san.entries());
    assert_eq!(sans.iter().filter(|s| matches!(s, SanEntry::Dns(_))).count(), 1);
    assert_eq!(sans.iter().filter(|s| matches!(s, SanEntry::Ip(_))).count(), 1);

    let usage = cert.key_usage()?.expect("key usage present");
    assert!(usage.digital_signature && usage.key_encipherment);
    assert!(!usage.key_cert_sign);
    let eku = cert.extended_key_usage()?;
    assert!(eku.contains(&ID_KP_SERVER_AUTH) && eku.contains(&ID_KP_CLIENT_AUTH));

    // 4. Files on disk
    let chain_path = temp_dir.path().join("service.test.com-ca.crt");
    assert_eq!(artifacts.chain.as_deref(), Some(chain_path.as_path()));
    assert!(temp_dir.path().join("service.test.com.key").is_file());
    for path in artifacts.paths() {
        assert!(fs::metadata(path)?.len() > 0, "{} is empty", path.display());
    }
    let chain = inspect_pem(&fs::read_to_string(artifacts.chain.as_ref().unwrap())?)?;
    assert_eq!(chain.len(), 2);
    assert!(!chain[0].is_ca);
    assert!(chain[1].is_ca);

    Ok(())
}

#[test]
fn test_tampered_signature_fails_verification() -> Result<()> {
    let ca = test_ca()?;
    let leaf = CertificateBuilder::leaf("service.test.com")
        .with_dns_san("service.test.com")
        .with_key_length(2048)
        .issue(&ca)?;

    // The signature is the last field of the encoding.
    let mut der = leaf.certificate.to_der()?;
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let tampered = Certificate::from_der(&der)?;

    assert!(matches!(
        tampered.verify_signed_by(ca.certificate()),
        Err(Error::Verification(_))
    ));
    Ok(())
}

#[test]
fn test_validity_matches_requested_days() -> Result<()> {
    let ca = test_ca()?;
    for days in [1u32, 30, 365] {
        let leaf = CertificateBuilder::leaf("service.test.com")
            .with_dns_san("service.test.com")
            .with_key_length(2048)
            .with_validity_days(days)
            .issue(&ca)?;
        let span = leaf.certificate.not_after() - leaf.certificate.not_before();
        assert_eq!(span.num_seconds(), i64::from(days) * 86_400);
    }
    Ok(())
}

#[test]
fn test_leaf_without_issuer_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let request = CertificateBuilder::leaf("service.test.com")
        .with_dns_san("service.test.com")
        .with_key_length(2048)
        .build()?;

    let exporter = ArtifactExporter::new(temp_dir.path().join("tls"), ArtifactNaming::default());

    let result = issue_root(&request).and_then(|issued| {
        exporter.export(&request.artifact_name, &issued.key_pair, &issued.certificate, None)
    });

    assert!(matches!(result, Err(Error::ExtensionPlanning(_))));
    assert!(!exporter.directory().exists());
    assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_weak_key_is_rejected() {
    assert!(matches!(KeyPair::generate(65537, 512), Err(Error::KeyGeneration(_))));

    let request = CertificateBuilder::root("ca.test.com")
        .with_dns_san("ca.test.com")
        .with_key_length(512)
        .build()
        .unwrap();
    assert!(matches!(
        CertificateAuthority::new_root(&request),
        Err(Error::KeyGeneration(_))
    ));
}

#[test]
fn test_ca_round_trips_through_disk() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cert_path = temp_dir.path().join("ca.crt");
    let key_path = temp_dir.path().join("ca.key");

    let ca = test_ca()?;
    ca.save_pem(&cert_path, &key_path)?;
    let loaded = CertificateAuthority::load_pem(&cert_path, &key_path)?;

    let leaf = CertificateBuilder::leaf("service.test.com")
        .with_dns_san("service.test.com")
        .with_key_length(2048)
        .issue(&loaded)?;
    leaf.certificate.verify_signed_by(ca.certificate())?;
    Ok(())
}

#[test]
fn test_batch_from_settings() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let json = format!(
        r#"{{
            "ca": {{"common_name": "ca.test.com", "validity_days": 2}},
            "leaf": {{"validity_days": 1}},
            "rsa": {{"key_length": 2048}},
            "output": {{"directory": {:?}}},
            "leaves": [
                {{"artifact_name": "service", "common_name": "service.test.com", "san_ips": ["127.0.0.1"]}},
                {{"artifact_name": "broken", "common_name": "broken.test.com", "san_ips": ["10.0.0.999"]}}
            ],
            "stages": {{"count": 2, "name_prefix": "server", "domain": "test.com",
                        "network_prefix": "10.0.0", "start_address": 10}},
            "workers": 2
        }}"#,
        temp_dir.path().display().to_string()
    );
    let settings = SettingsLayer::defaults()
        .merge(SettingsLayer::from_json_str(&json)?)
        .resolve()?;

    let plan = settings.batch()?;
    let report = settings.orchestrator().issue_plan(plan)?;

    let names: Vec<_> = report.bundles.iter().map(|b| b.artifact_name.as_str()).collect();
    assert_eq!(names, vec!["service", "server-1", "server-2"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].artifact_name, "broken");
    assert!(matches!(report.failures[0].error, Error::InvalidSan { .. }));
    assert!(!temp_dir.path().join("broken.crt").exists());

    let stage = &report.bundles[2].leaf;
    assert_eq!(stage.common_name().as_deref(), Some("server-2.test.com"));
    assert!(stage
        .subject_alt_names()?
        .contains(&SanEntry::Ip("10.0.0.12".parse().unwrap())));

    for name in ["ca.crt", "ca.key", "ca.pem", "server-2-ca.crt", "service.pem"] {
        assert!(temp_dir.path().join(name).is_file(), "missing {name}");
    }
    assert!(!temp_dir.path().join("ca-ca.crt").exists());
    Ok(())
}
