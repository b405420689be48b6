use crate::error::{Error, Result};
use crate::key::KeyParams;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, GeneralizedTime, Ia5String, OctetString, SetOfVec, UtcTime};
use der::Tag;
use std::fmt;
use std::net::IpAddr;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::time::{Time, Validity};

pub(crate) const COUNTRY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
pub(crate) const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Subject of a certificate: an optional ISO 3166 country code and a
/// mandatory common name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectIdentity {
    country_code: Option<String>,
    common_name: String,
}

impl SubjectIdentity {
    /// Validates and builds a subject. An empty `country_code` leaves the
    /// C attribute out of the encoded name.
    pub fn build(country_code: &str, common_name: &str) -> Result<Self> {
        let common_name = common_name.trim();
        if common_name.is_empty() {
            return Err(Error::InvalidSubject("common name is empty".into()));
        }

        let country_code = country_code.trim();
        let country_code = if country_code.is_empty() {
            None
        } else if country_code.len() == 2 && country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(country_code.to_ascii_uppercase())
        } else {
            return Err(Error::InvalidSubject(format!(
                "country code '{}' must be two ASCII letters",
                country_code
            )));
        };

        Ok(Self {
            country_code,
            common_name: common_name.to_string(),
        })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    /// Encodes the subject as an X.501 name, C before CN.
    pub fn to_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(2);
        if let Some(ref country) = self.country_code {
            rdns.push(single_attribute(COUNTRY_NAME, Tag::PrintableString, country)?);
        }
        rdns.push(single_attribute(COMMON_NAME, Tag::Utf8String, &self.common_name)?);
        Ok(RdnSequence(rdns))
    }
}

impl fmt::Display for SubjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.country_code {
            Some(ref country) => write!(f, "C={}, CN={}", country, self.common_name),
            None => write!(f, "CN={}", self.common_name),
        }
    }
}

fn single_attribute(oid: ObjectIdentifier, tag: Tag, value: &str) -> Result<RelativeDistinguishedName> {
    let value = Any::new(tag, value.as_bytes())?;
    let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])?;
    Ok(RelativeDistinguishedName(set))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

impl SanEntry {
    /// Parses an IP address string; anything that is not IPv4 or IPv6 is an
    /// `InvalidSan` error.
    pub fn parse_ip(value: &str) -> Result<Self> {
        value
            .trim()
            .parse::<IpAddr>()
            .map(SanEntry::Ip)
            .map_err(|e| Error::invalid_san(value, e))
    }

    pub fn dns(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::invalid_san(value, "DNS name is empty"));
        }
        if !value.is_ascii() {
            return Err(Error::invalid_san(value, "DNS name must be ASCII"));
        }
        Ok(SanEntry::Dns(value.to_string()))
    }

    fn to_general_name(&self) -> Result<GeneralName> {
        match self {
            SanEntry::Dns(name) => Ia5String::new(name)
                .map(GeneralName::DnsName)
                .map_err(|e| Error::invalid_san(name.as_str(), e)),
            SanEntry::Ip(IpAddr::V4(ip)) => Ok(GeneralName::IpAddress(OctetString::new(ip.octets().to_vec())?)),
            SanEntry::Ip(IpAddr::V6(ip)) => Ok(GeneralName::IpAddress(OctetString::new(ip.octets().to_vec())?)),
        }
    }
}

impl fmt::Display for SanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanEntry::Dns(name) => write!(f, "DNS:{}", name),
            SanEntry::Ip(ip) => write!(f, "IP:{}", ip),
        }
    }
}

/// Ordered subject alternative names. Duplicates are kept as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanSet {
    entries: Vec<SanEntry>,
}

impl SanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// DNS names first, then IP addresses, each list in the given order.
    pub fn from_lists<S: AsRef<str>>(dns_names: &[S], ip_addresses: &[S]) -> Result<Self> {
        let mut san = Self::new();
        for name in dns_names {
            san.push(SanEntry::dns(name.as_ref())?);
        }
        for ip in ip_addresses {
            san.push(SanEntry::parse_ip(ip.as_ref())?);
        }
        Ok(san)
    }

    pub fn with_dns(mut self, name: &str) -> Result<Self> {
        self.push(SanEntry::dns(name)?);
        Ok(self)
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.push(SanEntry::Ip(ip));
        self
    }

    pub fn push(&mut self, entry: SanEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn first_dns(&self) -> Option<&str> {
        self.entries.iter().find_map(|entry| match entry {
            SanEntry::Dns(name) => Some(name.as_str()),
            SanEntry::Ip(_) => None,
        })
    }

    pub(crate) fn to_general_names(&self) -> Result<Vec<GeneralName>> {
        self.entries.iter().map(SanEntry::to_general_name).collect()
    }
}

impl FromIterator<SanEntry> for SanSet {
    fn from_iter<I: IntoIterator<Item = SanEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Validity period starting at a whole-second UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn starting_now(validity_days: u32) -> Result<Self> {
        Self::starting_at(Utc::now(), validity_days)
    }

    pub fn starting_at(instant: DateTime<Utc>, validity_days: u32) -> Result<Self> {
        if validity_days == 0 {
            return Err(Error::InvalidInput("validity days must be positive".into()));
        }

        let not_before = Utc
            .timestamp_opt(instant.timestamp(), 0)
            .single()
            .ok_or_else(|| Error::InvalidInput(format!("invalid issuance instant {}", instant)))?;
        let not_after = not_before
            .checked_add_signed(Duration::days(i64::from(validity_days)))
            .ok_or_else(|| Error::InvalidInput(format!("{} validity days overflow", validity_days)))?;

        Ok(Self { not_before, not_after })
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn to_x509(&self) -> Result<Validity> {
        Ok(Validity {
            not_before: to_time(self.not_before)?,
            not_after: to_time(self.not_after)?,
        })
    }
}

// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050 on.
fn to_time(instant: DateTime<Utc>) -> Result<Time> {
    let seconds = u64::try_from(instant.timestamp())
        .map_err(|_| Error::InvalidInput(format!("{} predates the Unix epoch", instant)))?;
    let since_epoch = std::time::Duration::from_secs(seconds);

    if instant.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

/// Role flags; the only axis along which issued certificates differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleFlags {
    pub is_ca: bool,
    pub is_key_encipherer: bool,
    pub is_cert_signer: bool,
}

impl RoleFlags {
    pub fn root() -> Self {
        Self {
            is_ca: true,
            is_key_encipherer: false,
            is_cert_signer: true,
        }
    }

    pub fn leaf(is_key_encipherer: bool) -> Self {
        Self {
            is_ca: false,
            is_key_encipherer,
            is_cert_signer: false,
        }
    }

    pub fn with_key_encipherment(mut self, enabled: bool) -> Self {
        self.is_key_encipherer = enabled;
        self
    }
}

/// Everything needed to issue one certificate except the issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    pub subject: SubjectIdentity,
    pub san: SanSet,
    pub validity_days: u32,
    pub key_params: KeyParams,
    pub role: RoleFlags,
    pub artifact_name: String,
}

impl IssuanceRequest {
    pub fn new(subject: SubjectIdentity, san: SanSet, validity_days: u32, key_params: KeyParams, role: RoleFlags) -> Self {
        let artifact_name = subject.common_name().to_string();
        Self {
            subject,
            san,
            validity_days,
            key_params,
            role,
            artifact_name,
        }
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_subject_requires_common_name() {
        let err = SubjectIdentity::build("US", "   ").unwrap_err();
        assert!(matches!(err, Error::InvalidSubject(_)));
    }

    #[test]
    fn test_subject_country_validation() {
        assert!(matches!(
            SubjectIdentity::build("USA", "ca.test.com"),
            Err(Error::InvalidSubject(_))
        ));
        assert!(matches!(
            SubjectIdentity::build("1A", "ca.test.com"),
            Err(Error::InvalidSubject(_))
        ));

        let subject = SubjectIdentity::build("us", "ca.test.com").unwrap();
        assert_eq!(subject.country_code(), Some("US"));

        let subject = SubjectIdentity::build("", "ca.test.com").unwrap();
        assert_eq!(subject.country_code(), None);
        assert_eq!(subject.to_name().unwrap().0.len(), 1);
    }

    #[test]
    fn test_subject_name_order() {
        let subject = SubjectIdentity::build("US", "ca.test.com").unwrap();
        let name = subject.to_name().unwrap();

        let oids: Vec<_> = name.0.iter().map(|rdn| rdn.0.iter().next().unwrap().oid).collect();
        assert_eq!(oids, vec![COUNTRY_NAME, COMMON_NAME]);
        assert_eq!(subject.to_string(), "C=US, CN=ca.test.com");
    }

    #[test]
    fn test_san_rejects_invalid_ip() {
        let err = SanSet::from_lists(&["service.test.com"], &["300.1.1.1"]).unwrap_err();
        match err {
            Error::InvalidSan { entry, .. } => assert_eq!(entry, "300.1.1.1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_san_preserves_order_and_duplicates() {
        let san = SanSet::from_lists(&["b.test", "a.test", "b.test"], &["127.0.0.1", "::1"]).unwrap();
        let rendered: Vec<String> = san.entries().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["DNS:b.test", "DNS:a.test", "DNS:b.test", "IP:127.0.0.1", "IP:::1"]
        );
        assert_eq!(san.first_dns(), Some("b.test"));
        assert_eq!(san.to_general_names().unwrap().len(), 5);
    }

    #[test]
    fn test_san_ip_octets() {
        let san = SanSet::new().with_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        let names = san.to_general_names().unwrap();
        match &names[0] {
            GeneralName::IpAddress(octets) => assert_eq!(octets.as_bytes(), &[127, 0, 0, 1]),
            other => panic!("unexpected general name: {other:?}"),
        }
    }

    #[test]
    fn test_validity_window_exact_days() {
        let instant = Utc.with_ymd_and_hms(2024, 2, 28, 12, 30, 15).unwrap();
        let window = ValidityWindow::starting_at(instant, 3).unwrap();
        assert_eq!(window.not_before(), instant);
        assert_eq!(window.not_after() - window.not_before(), Duration::days(3));
    }

    #[test]
    fn test_validity_window_truncates_subseconds() {
        let instant = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        let window = ValidityWindow::starting_at(instant, 1).unwrap();
        assert_eq!(window.not_before().timestamp_subsec_nanos(), 0);
        assert_eq!(window.not_before().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_validity_window_rejects_zero_days() {
        assert!(matches!(ValidityWindow::starting_now(0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validity_time_encoding_switches_in_2050() {
        let early = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(to_time(early).unwrap(), Time::UtcTime(_)));
        assert!(matches!(to_time(late).unwrap(), Time::GeneralTime(_)));
    }

    #[test]
    fn test_request_artifact_name_defaults_to_common_name() {
        let subject = SubjectIdentity::build("US", "service.test.com").unwrap();
        let san = SanSet::from_lists(&["service.test.com"], &[]).unwrap();
        let request = IssuanceRequest::new(subject, san, 1, KeyParams::default(), RoleFlags::leaf(true));
        assert_eq!(request.artifact_name, "service.test.com");
        assert_eq!(request.with_artifact_name("svc").artifact_name, "svc");
    }
}
