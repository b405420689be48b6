use crate::ca::{issue_root, CertificateAuthority, IssuedCertificate};
use crate::error::Result;
use crate::key::KeyParams;
use crate::types::{IssuanceRequest, RoleFlags, SanEntry, SanSet, SubjectIdentity};
use std::net::IpAddr;

pub const DEFAULT_ROOT_VALIDITY_DAYS: u32 = 3650;
pub const DEFAULT_LEAF_VALIDITY_DAYS: u32 = 365;

enum PendingSan {
    Dns(String),
    Ip(String),
}

/// Fluent construction of an [`IssuanceRequest`]. Nothing is validated until
/// [`build`](Self::build).
pub struct CertificateBuilder {
    common_name: String,
    country: String,
    san: Vec<PendingSan>,
    validity_days: u32,
    key_params: KeyParams,
    role: RoleFlags,
    artifact_name: Option<String>,
}

impl CertificateBuilder {
    pub fn new(common_name: impl Into<String>, role: RoleFlags) -> Self {
        let validity_days = if role.is_ca {
            DEFAULT_ROOT_VALIDITY_DAYS
        } else {
            DEFAULT_LEAF_VALIDITY_DAYS
        };
        Self {
            common_name: common_name.into(),
            country: "US".to_string(),
            san: Vec::new(),
            validity_days,
            key_params: KeyParams::default(),
            role,
            artifact_name: None,
        }
    }

    pub fn root(common_name: impl Into<String>) -> Self {
        Self::new(common_name, RoleFlags::root())
    }

    /// Leaves encipher keys unless told otherwise.
    pub fn leaf(common_name: impl Into<String>) -> Self {
        Self::new(common_name, RoleFlags::leaf(true))
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_dns_san(mut self, dns: impl Into<String>) -> Self {
        self.san.push(PendingSan::Dns(dns.into()));
        self
    }

    pub fn with_dns_sans(mut self, dns_names: Vec<String>) -> Self {
        self.san.extend(dns_names.into_iter().map(PendingSan::Dns));
        self
    }

    /// Parsed at build time; an unparsable address fails the build.
    pub fn with_ip_san(mut self, ip: impl Into<String>) -> Self {
        self.san.push(PendingSan::Ip(ip.into()));
        self
    }

    pub fn with_ip_addr(mut self, ip: IpAddr) -> Self {
        self.san.push(PendingSan::Ip(ip.to_string()));
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn with_key_params(mut self, key_params: KeyParams) -> Self {
        self.key_params = key_params;
        self
    }

    pub fn with_key_length(mut self, bits: usize) -> Self {
        self.key_params.key_length_bits = bits;
        self
    }

    pub fn with_public_exponent(mut self, exponent: u64) -> Self {
        self.key_params.public_exponent = exponent;
        self
    }

    pub fn with_key_encipherment(mut self, enabled: bool) -> Self {
        self.role = self.role.with_key_encipherment(enabled);
        self
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<IssuanceRequest> {
        let subject = SubjectIdentity::build(&self.country, &self.common_name)?;

        let mut san = SanSet::new();
        for entry in &self.san {
            san.push(match entry {
                PendingSan::Dns(name) => SanEntry::dns(name)?,
                PendingSan::Ip(ip) => SanEntry::parse_ip(ip)?,
            });
        }

        let request = IssuanceRequest::new(subject, san, self.validity_days, self.key_params, self.role);
        Ok(match self.artifact_name {
            Some(name) => request.with_artifact_name(name),
            None => request,
        })
    }

    pub fn issue_root(self) -> Result<IssuedCertificate> {
        issue_root(&self.build()?)
    }

    pub fn issue(self, ca: &CertificateAuthority) -> Result<IssuedCertificate> {
        ca.issue_leaf(&self.build()?)
    }
}
