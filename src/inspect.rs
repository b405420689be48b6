use crate::error::{Error, Result};
use crate::x509::Certificate;
use chrono::{DateTime, Utc};
use colored::Colorize;
use rsa::traits::PublicKeyParts;
use serde::Serialize;
use std::str::FromStr;
use x509_parser::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: String,
    pub not_after: String,
    pub is_valid: bool,
    pub validity_status: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub public_key_size: Option<usize>,
    pub subject_alt_names: Vec<String>,
    pub is_ca: bool,
    pub key_usage: Vec<String>,
    pub extended_key_usage: Vec<String>,
    pub subject_key_id: Option<String>,
    pub authority_key_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "json" => Ok(OutputFormat::Json),
            _ => Err(Error::InvalidInput(format!("Invalid format: {}", s))),
        }
    }
}

/// Summarises every CERTIFICATE block in `text`, in file order.
pub fn inspect_pem(text: &str) -> Result<Vec<CertificateSummary>> {
    let certificates = Certificate::all_from_pem(text)?;
    if certificates.is_empty() {
        return Err(Error::CertParse("no CERTIFICATE block found".into()));
    }
    certificates.iter().map(summarize).collect()
}

pub fn summarize(certificate: &Certificate) -> Result<CertificateSummary> {
    let der = certificate.to_der()?;
    let (_, x509) = X509Certificate::from_der(&der)
        .map_err(|e| Error::CertParse(format!("Failed to parse certificate: {}", e)))?;

    let now = Utc::now().timestamp();
    let not_before_ts = x509.validity.not_before.timestamp();
    let not_after_ts = x509.validity.not_after.timestamp();

    let is_valid = now >= not_before_ts && now <= not_after_ts;
    let validity_status = if now < not_before_ts {
        "Not yet valid"
    } else if now > not_after_ts {
        "Expired"
    } else {
        "Valid"
    };

    let (public_key_algorithm, public_key_size) = match x509.public_key().parsed() {
        Ok(x509_parser::public_key::PublicKey::RSA(_)) => {
            ("RSA".to_string(), Some(certificate.public_key()?.size() * 8))
        }
        Ok(x509_parser::public_key::PublicKey::EC(_)) => ("ECDSA".to_string(), None),
        _ => ("Unknown".to_string(), None),
    };

    let mut subject_alt_names = Vec::new();
    if let Ok(Some(san_ext)) = x509.subject_alternative_name() {
        for san in &san_ext.value.general_names {
            match san {
                GeneralName::DNSName(name) => subject_alt_names.push(format!("DNS:{}", name)),
                GeneralName::IPAddress(ip) => subject_alt_names.push(format!("IP:{}", format_ip(ip))),
                _ => {}
            }
        }
    }

    let is_ca = x509
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);

    let key_usage = certificate
        .key_usage()?
        .map(|bits| bits.names().into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    let mut extended_key_usage = Vec::new();
    if let Ok(Some(eku_ext)) = x509.extended_key_usage() {
        let eku = &eku_ext.value;
        if eku.server_auth {
            extended_key_usage.push("TLS Web Server Authentication".to_string());
        }
        if eku.client_auth {
            extended_key_usage.push("TLS Web Client Authentication".to_string());
        }
        for oid in &eku.other {
            extended_key_usage.push(oid.to_string());
        }
    }

    Ok(CertificateSummary {
        subject: format_dn(&x509.subject),
        issuer: format_dn(&x509.issuer),
        serial_number: format_serial(x509.serial.to_bytes_be().as_slice()),
        not_before: format_timestamp(not_before_ts),
        not_after: format_timestamp(not_after_ts),
        is_valid,
        validity_status: validity_status.to_string(),
        signature_algorithm: signature_algorithm_name(&x509.signature_algorithm.algorithm.to_id_string()),
        public_key_algorithm,
        public_key_size,
        subject_alt_names,
        is_ca,
        key_usage,
        extended_key_usage,
        subject_key_id: certificate.subject_key_id()?.map(|id| id.to_string()),
        authority_key_id: certificate.authority_key_id()?.map(|id| id.to_string()),
    })
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption".to_string(),
        other => other.to_string(),
    }
}

fn format_dn(dn: &X509Name) -> String {
    let mut parts = Vec::new();

    for rdn in dn.iter() {
        for attr in rdn.iter() {
            let name = match attr.attr_type().to_id_string().as_str() {
                "2.5.4.3" => "CN",
                "2.5.4.6" => "C",
                "2.5.4.10" => "O",
                "2.5.4.11" => "OU",
                _ => continue,
            };
            let value = attr.attr_value().as_str().unwrap_or("?");
            parts.push(format!("{}={}", name, value));
        }
    }

    parts.join(", ")
}

fn format_serial(serial: &[u8]) -> String {
    serial
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_ip(ip_bytes: &[u8]) -> String {
    match ip_bytes.len() {
        4 => std::net::Ipv4Addr::from([ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3]]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(ip_bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => format!("{:?}", ip_bytes),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn display_summaries(summaries: &[CertificateSummary], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Pretty => Ok(display_pretty(summaries)),
        OutputFormat::Json => serde_json::to_string_pretty(summaries).map_err(|e| Error::Encoding(e.to_string())),
    }
}

fn display_pretty(summaries: &[CertificateSummary]) -> String {
    let mut output = String::new();

    output.push_str(&format!("\n{}\n", "Certificates".bold().cyan()));
    output.push_str(&format!("{}\n\n", "=".repeat(80)));

    for (idx, cert) in summaries.iter().enumerate() {
        let label = if cert.is_ca { "CA Certificate" } else { "Leaf Certificate" };

        output.push_str(&format!("{} {}\n", "Certificate".bold(), format!("[{}]", idx).dimmed()));
        output.push_str(&format!("{}: {}\n", "Type".bold(), label));
        output.push_str(&format!("{}\n", "-".repeat(80)));

        output.push_str(&format!("  {}: {}\n", "Subject".bold().yellow(), cert.subject));
        output.push_str(&format!("  {}: {}\n", "Issuer".bold().yellow(), cert.issuer));
        output.push_str(&format!("  {}: {}\n", "Serial Number".bold().yellow(), cert.serial_number));

        let validity = if cert.is_valid {
            cert.validity_status.green()
        } else {
            cert.validity_status.red()
        };
        output.push_str(&format!("  {}: {}\n", "Validity Status".bold().yellow(), validity));
        output.push_str(&format!("  {}: {}\n", "Not Before".bold().yellow(), cert.not_before.dimmed()));
        output.push_str(&format!("  {}: {}\n", "Not After".bold().yellow(), cert.not_after.dimmed()));
        output.push_str(&format!(
            "  {}: {}\n",
            "Signature Algorithm".bold().yellow(),
            cert.signature_algorithm.dimmed()
        ));

        let public_key = match cert.public_key_size {
            Some(size) => format!("{} ({} bits)", cert.public_key_algorithm, size),
            None => cert.public_key_algorithm.clone(),
        };
        output.push_str(&format!("  {}: {}\n", "Public Key".bold().yellow(), public_key.dimmed()));

        if !cert.subject_alt_names.is_empty() {
            output.push_str(&format!("  {}:\n", "Subject Alternative Names".bold().yellow()));
            for san in &cert.subject_alt_names {
                output.push_str(&format!("    - {}\n", san.cyan()));
            }
        }

        if !cert.key_usage.is_empty() {
            output.push_str(&format!(
                "  {}: {}\n",
                "Key Usage".bold().yellow(),
                cert.key_usage.join(", ").dimmed()
            ));
        }

        if !cert.extended_key_usage.is_empty() {
            output.push_str(&format!(
                "  {}: {}\n",
                "Extended Key Usage".bold().yellow(),
                cert.extended_key_usage.join(", ").dimmed()
            ));
        }

        if let Some(ref ski) = cert.subject_key_id {
            output.push_str(&format!("  {}: {}\n", "Subject Key ID".bold().yellow(), ski.dimmed()));
        }
        if let Some(ref aki) = cert.authority_key_id {
            output.push_str(&format!("  {}: {}\n", "Authority Key ID".bold().yellow(), aki.dimmed()));
        }

        output.push('\n');
    }

    output.push_str(&format!("{}\n", "=".repeat(80)));
    output.push_str(&format!("{}: {}\n", "Total Certificates".bold().cyan(), summaries.len()));

    output
}
