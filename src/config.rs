//! Layered configuration.
//!
//! A [`SettingsLayer`] has every field optional. Layers are combined with
//! [`SettingsLayer::merge`] (built-in defaults, then a JSON file, then
//! `CERTFORGE_*` environment variables) and resolved into a validated
//! [`Settings`], which is the only thing the rest of the crate reads.

use crate::error::{Error, Result};
use crate::export::{ArtifactExporter, ArtifactNaming};
use crate::key::{KeyParams, DEFAULT_KEY_LENGTH_BITS, DEFAULT_PUBLIC_EXPONENT};
use crate::orchestrator::{BatchPlan, IssuanceOrchestrator, LeafFailure, PlannedLeaf, MAX_WORKERS};
use crate::types::{IssuanceRequest, RoleFlags, SanSet, SubjectIdentity};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const ENV_PREFIX: &str = "CERTFORGE_";

/// Upper bound on `stages.count`.
pub const MAX_STAGE_COUNT: u32 = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaLayer {
    pub common_name: Option<String>,
    pub country: Option<String>,
    pub artifact_name: Option<String>,
    pub san_dns: Option<Vec<String>>,
    pub san_ips: Option<Vec<String>>,
    pub validity_days: Option<u32>,
    pub key_encipherment: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeafLayer {
    pub validity_days: Option<u32>,
    pub key_encipherment: Option<bool>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RsaLayer {
    pub public_exponent: Option<u64>,
    pub key_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputLayer {
    pub directory: Option<PathBuf>,
    pub key_ext: Option<String>,
    pub cert_ext: Option<String>,
    pub pem_ext: Option<String>,
    pub ca_suffix: Option<String>,
}

/// An explicitly listed leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeafSpec {
    #[serde(default)]
    pub artifact_name: Option<String>,
    pub common_name: String,
    #[serde(default)]
    pub san_dns: Vec<String>,
    #[serde(default)]
    pub san_ips: Vec<String>,
}

/// Numbered server stages. Stage `i` (1-based) becomes the leaf
/// `<name_prefix>-<i>` with CN `<name_prefix>-<i>.<domain>` and, when a
/// network prefix is set, the IP `<network_prefix>.<start_address + i>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub count: u32,
    pub name_prefix: String,
    pub domain: String,
    #[serde(default)]
    pub network_prefix: Option<String>,
    #[serde(default)]
    pub start_address: u32,
    #[serde(default)]
    pub extra_dns: Vec<String>,
}

impl StageSpec {
    pub fn validate(&self) -> Result<()> {
        if self.count > MAX_STAGE_COUNT {
            return Err(Error::Config(format!(
                "stages: count {} exceeds {}",
                self.count, MAX_STAGE_COUNT
            )));
        }
        if self.network_prefix.is_some() {
            match self.start_address.checked_add(self.count) {
                Some(last) if last <= 255 => {}
                _ => {
                    return Err(Error::Config(format!(
                        "stages: start_address {} + count {} exceeds 255",
                        self.start_address, self.count
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn leaf_specs(&self) -> Result<Vec<LeafSpec>> {
        self.validate()?;
        Ok((1..=self.count)
            .map(|index| {
                let name = format!("{}-{}", self.name_prefix, index);
                let common_name = format!("{}.{}", name, self.domain);

                let mut san_dns = vec![common_name.clone(), self.domain.clone()];
                san_dns.extend(self.extra_dns.iter().cloned());
                // validate() bounds start_address + count by 255.
                let san_ips = self
                    .network_prefix
                    .as_ref()
                    .map(|prefix| vec![format!("{}.{}", prefix, self.start_address + index)])
                    .unwrap_or_default();

                LeafSpec {
                    artifact_name: Some(name),
                    common_name,
                    san_dns,
                    san_ips,
                }
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsLayer {
    pub ca: CaLayer,
    pub leaf: LeafLayer,
    pub rsa: RsaLayer,
    pub output: OutputLayer,
    pub leaves: Option<Vec<LeafSpec>>,
    pub stages: Option<StageSpec>,
    pub workers: Option<usize>,
}

impl SettingsLayer {
    pub fn defaults() -> Self {
        let naming = ArtifactNaming::default();
        Self {
            ca: CaLayer {
                common_name: Some("ca.local".to_string()),
                country: Some("US".to_string()),
                artifact_name: Some("ca".to_string()),
                san_dns: Some(Vec::new()),
                san_ips: Some(Vec::new()),
                validity_days: Some(3650),
                key_encipherment: Some(false),
            },
            leaf: LeafLayer {
                validity_days: Some(365),
                key_encipherment: Some(true),
                country: Some("US".to_string()),
            },
            rsa: RsaLayer {
                public_exponent: Some(DEFAULT_PUBLIC_EXPONENT),
                key_length: Some(DEFAULT_KEY_LENGTH_BITS),
            },
            output: OutputLayer {
                directory: Some(PathBuf::from("tls")),
                key_ext: Some(naming.key_ext),
                cert_ext: Some(naming.cert_ext),
                pem_ext: Some(naming.pem_ext),
                ca_suffix: Some(naming.ca_suffix),
            },
            leaves: Some(Vec::new()),
            stages: None,
            workers: Some(1),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid settings: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&json).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `CERTFORGE_<SECTION>_<FIELD>` keys through `lookup`. Lists are
    /// comma separated; a value that does not parse is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        Ok(Self {
            ca: CaLayer {
                common_name: env.string("CA_COMMON_NAME"),
                country: env.string("CA_COUNTRY"),
                artifact_name: env.string("CA_ARTIFACT_NAME"),
                san_dns: env.list("CA_SAN_DNS"),
                san_ips: env.list("CA_SAN_IPS"),
                validity_days: env.parse("CA_VALIDITY_DAYS")?,
                key_encipherment: env.parse("CA_KEY_ENCIPHERMENT")?,
            },
            leaf: LeafLayer {
                validity_days: env.parse("LEAF_VALIDITY_DAYS")?,
                key_encipherment: env.parse("LEAF_KEY_ENCIPHERMENT")?,
                country: env.string("LEAF_COUNTRY"),
            },
            rsa: RsaLayer {
                public_exponent: env.parse("RSA_PUBLIC_EXPONENT")?,
                key_length: env.parse("RSA_KEY_LENGTH")?,
            },
            output: OutputLayer {
                directory: env.string("OUTPUT_DIRECTORY").map(PathBuf::from),
                key_ext: env.string("OUTPUT_KEY_EXT"),
                cert_ext: env.string("OUTPUT_CERT_EXT"),
                pem_ext: env.string("OUTPUT_PEM_EXT"),
                ca_suffix: env.string("OUTPUT_CA_SUFFIX"),
            },
            leaves: None,
            stages: None,
            workers: env.parse("WORKERS")?,
        })
    }

    /// Fields set in `over` win.
    pub fn merge(self, over: Self) -> Self {
        Self {
            ca: CaLayer {
                common_name: over.ca.common_name.or(self.ca.common_name),
                country: over.ca.country.or(self.ca.country),
                artifact_name: over.ca.artifact_name.or(self.ca.artifact_name),
                san_dns: over.ca.san_dns.or(self.ca.san_dns),
                san_ips: over.ca.san_ips.or(self.ca.san_ips),
                validity_days: over.ca.validity_days.or(self.ca.validity_days),
                key_encipherment: over.ca.key_encipherment.or(self.ca.key_encipherment),
            },
            leaf: LeafLayer {
                validity_days: over.leaf.validity_days.or(self.leaf.validity_days),
                key_encipherment: over.leaf.key_encipherment.or(self.leaf.key_encipherment),
                country: over.leaf.country.or(self.leaf.country),
            },
            rsa: RsaLayer {
                public_exponent: over.rsa.public_exponent.or(self.rsa.public_exponent),
                key_length: over.rsa.key_length.or(self.rsa.key_length),
            },
            output: OutputLayer {
                directory: over.output.directory.or(self.output.directory),
                key_ext: over.output.key_ext.or(self.output.key_ext),
                cert_ext: over.output.cert_ext.or(self.output.cert_ext),
                pem_ext: over.output.pem_ext.or(self.output.pem_ext),
                ca_suffix: over.output.ca_suffix.or(self.output.ca_suffix),
            },
            leaves: over.leaves.or(self.leaves),
            stages: over.stages.or(self.stages),
            workers: over.workers.or(self.workers),
        }
    }

    pub fn resolve(self) -> Result<Settings> {
        let settings = Settings {
            ca: CaSettings {
                common_name: required(self.ca.common_name, "ca.common_name")?,
                country: required(self.ca.country, "ca.country")?,
                artifact_name: required(self.ca.artifact_name, "ca.artifact_name")?,
                san_dns: self.ca.san_dns.unwrap_or_default(),
                san_ips: self.ca.san_ips.unwrap_or_default(),
                validity_days: required(self.ca.validity_days, "ca.validity_days")?,
                key_encipherment: self.ca.key_encipherment.unwrap_or(false),
            },
            leaf: LeafSettings {
                validity_days: required(self.leaf.validity_days, "leaf.validity_days")?,
                key_encipherment: required(self.leaf.key_encipherment, "leaf.key_encipherment")?,
                country: self.leaf.country.unwrap_or_default(),
            },
            rsa: KeyParams::new(
                required(self.rsa.public_exponent, "rsa.public_exponent")?,
                required(self.rsa.key_length, "rsa.key_length")?,
            ),
            output: OutputSettings {
                directory: required(self.output.directory, "output.directory")?,
                naming: ArtifactNaming {
                    key_ext: required(self.output.key_ext, "output.key_ext")?,
                    cert_ext: required(self.output.cert_ext, "output.cert_ext")?,
                    pem_ext: required(self.output.pem_ext, "output.pem_ext")?,
                    ca_suffix: required(self.output.ca_suffix, "output.ca_suffix")?,
                },
            },
            leaves: self.leaves.unwrap_or_default(),
            stages: self.stages,
            workers: required(self.workers, "workers")?,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("missing setting '{}'", name)))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key))
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(key)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| {
                    Error::Config(format!("{}{}: invalid value '{}': {}", ENV_PREFIX, key, value, e))
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaSettings {
    pub common_name: String,
    pub country: String,
    pub artifact_name: String,
    pub san_dns: Vec<String>,
    pub san_ips: Vec<String>,
    pub validity_days: u32,
    pub key_encipherment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSettings {
    pub validity_days: u32,
    pub key_encipherment: bool,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub naming: ArtifactNaming,
}

/// Validated settings for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ca: CaSettings,
    pub leaf: LeafSettings,
    pub rsa: KeyParams,
    pub output: OutputSettings,
    pub leaves: Vec<LeafSpec>,
    pub stages: Option<StageSpec>,
    pub workers: usize,
}

impl Settings {
    /// Defaults, then the JSON file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut layer = SettingsLayer::defaults();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading settings file");
            layer = layer.merge(SettingsLayer::from_file(path)?);
        }
        layer.merge(SettingsLayer::from_env()?).resolve()
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::Config(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.ca.validity_days == 0 || self.leaf.validity_days == 0 {
            return Err(Error::Config("validity days must be positive".into()));
        }
        self.rsa
            .validate()
            .map_err(|e| Error::Config(format!("rsa: {}", e)))?;

        let naming = &self.output.naming;
        for (name, value) in [
            ("output.key_ext", &naming.key_ext),
            ("output.cert_ext", &naming.cert_ext),
            ("output.pem_ext", &naming.pem_ext),
            ("output.ca_suffix", &naming.ca_suffix),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(Error::Config(format!("{} '{}' is not a valid file name part", name, value)));
            }
        }
        if naming.key_ext == naming.cert_ext || naming.key_ext == naming.pem_ext || naming.cert_ext == naming.pem_ext {
            return Err(Error::Config("output extensions must be distinct".into()));
        }

        if let Some(ref stages) = self.stages {
            stages.validate()?;
        }
        Ok(())
    }

    pub fn root_request(&self) -> Result<IssuanceRequest> {
        let subject = SubjectIdentity::build(&self.ca.country, &self.ca.common_name)?;
        let san = if self.ca.san_dns.is_empty() && self.ca.san_ips.is_empty() {
            SanSet::from_lists(&[self.ca.common_name.as_str()], &[])?
        } else {
            SanSet::from_lists(self.ca.san_dns.as_slice(), self.ca.san_ips.as_slice())?
        };
        let role = RoleFlags::root().with_key_encipherment(self.ca.key_encipherment);

        Ok(IssuanceRequest::new(subject, san, self.ca.validity_days, self.rsa, role)
            .with_artifact_name(self.ca.artifact_name.clone()))
    }

    /// Explicit leaves first, then stage leaves. A leaf that cannot be
    /// built is returned as a failure in its place; only invalid stage
    /// settings fail the whole call.
    pub fn leaf_requests(&self) -> Result<Vec<PlannedLeaf>> {
        let stage_specs = match self.stages {
            Some(ref stages) => stages.leaf_specs()?,
            None => Vec::new(),
        };

        Ok(self
            .leaves
            .iter()
            .chain(stage_specs.iter())
            .map(|spec| {
                self.leaf_request(spec).map_err(|error| LeafFailure {
                    artifact_name: spec.artifact_name.clone().unwrap_or_else(|| spec.common_name.clone()),
                    error,
                })
            })
            .collect())
    }

    pub fn leaf_request(&self, spec: &LeafSpec) -> Result<IssuanceRequest> {
        let subject = SubjectIdentity::build(&self.leaf.country, &spec.common_name)?;
        let san = if spec.san_dns.is_empty() && spec.san_ips.is_empty() {
            SanSet::from_lists(&[spec.common_name.as_str()], &[])?
        } else {
            SanSet::from_lists(spec.san_dns.as_slice(), spec.san_ips.as_slice())?
        };

        let request = IssuanceRequest::new(
            subject,
            san,
            self.leaf.validity_days,
            self.rsa,
            RoleFlags::leaf(self.leaf.key_encipherment),
        );
        Ok(match spec.artifact_name {
            Some(ref name) => request.with_artifact_name(name.clone()),
            None => request,
        })
    }

    pub fn batch(&self) -> Result<BatchPlan> {
        Ok(BatchPlan {
            root: self.root_request()?,
            leaves: self.leaf_requests()?,
        })
    }

    pub fn exporter(&self) -> ArtifactExporter {
        ArtifactExporter::new(self.output.directory.clone(), self.output.naming.clone())
    }

    pub fn orchestrator(&self) -> IssuanceOrchestrator {
        IssuanceOrchestrator::new(self.exporter()).with_workers(self.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_resolve() {
        let settings = SettingsLayer::defaults().resolve().unwrap();
        assert_eq!(settings.ca.common_name, "ca.local");
        assert_eq!(settings.ca.validity_days, 3650);
        assert_eq!(settings.leaf.validity_days, 365);
        assert!(settings.leaf.key_encipherment);
        assert_eq!(settings.rsa, KeyParams::new(65537, 4096));
        assert_eq!(settings.output.directory, PathBuf::from("tls"));
        assert_eq!(settings.output.naming, ArtifactNaming::default());
        assert_eq!(settings.workers, 1);
    }

    #[test]
    fn test_merge_precedence() {
        let file = SettingsLayer::from_json_str(
            r#"{"ca": {"common_name": "ca.test.com"}, "rsa": {"key_length": 3072}, "workers": 2}"#,
        )
        .unwrap();
        let env = SettingsLayer::from_lookup(lookup(&[
            ("CERTFORGE_RSA_KEY_LENGTH", "2048"),
            ("CERTFORGE_OUTPUT_CA_SUFFIX", "root"),
        ]))
        .unwrap();

        let settings = SettingsLayer::defaults().merge(file).merge(env).resolve().unwrap();
        assert_eq!(settings.ca.common_name, "ca.test.com");
        assert_eq!(settings.ca.country, "US");
        assert_eq!(settings.rsa.key_length_bits, 2048);
        assert_eq!(settings.output.naming.ca_suffix, "root");
        assert_eq!(settings.workers, 2);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = SettingsLayer::from_json_str(r#"{"rsa": {"key_size": 2048}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(SettingsLayer::from_json_str(r#"{"colour": "blue"}"#).is_err());
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let err = SettingsLayer::from_lookup(lookup(&[("CERTFORGE_WORKERS", "many")])).unwrap_err();
        match err {
            Error::Config(message) => assert!(message.contains("CERTFORGE_WORKERS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_lists() {
        let env = SettingsLayer::from_lookup(lookup(&[("CERTFORGE_CA_SAN_DNS", "a.test, b.test,,")])).unwrap();
        assert_eq!(env.ca.san_dns, Some(vec!["a.test".to_string(), "b.test".to_string()]));
    }

    #[test]
    fn test_validation() {
        let mut layer = SettingsLayer::defaults();
        layer.workers = Some(0);
        assert!(matches!(layer.resolve(), Err(Error::Config(_))));

        let mut layer = SettingsLayer::defaults();
        layer.rsa.key_length = Some(1024);
        assert!(matches!(layer.resolve(), Err(Error::Config(_))));

        let mut layer = SettingsLayer::defaults();
        layer.output.pem_ext = Some("crt".into());
        assert!(matches!(layer.resolve(), Err(Error::Config(_))));
    }

    #[test]
    fn test_stage_expansion() {
        let stages = StageSpec {
            count: 2,
            name_prefix: "server".into(),
            domain: "test.com".into(),
            network_prefix: Some("10.0.0".into()),
            start_address: 10,
            extra_dns: vec!["localhost".into()],
        };
        let specs = stages.leaf_specs().unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].artifact_name.as_deref(), Some("server-2"));
        assert_eq!(specs[1].common_name, "server-2.test.com");
        assert_eq!(specs[1].san_dns, vec!["server-2.test.com", "test.com", "localhost"]);
        assert_eq!(specs[1].san_ips, vec!["10.0.0.12"]);
    }

    #[test]
    fn test_batch_requests() {
        let file = SettingsLayer::from_json_str(
            r#"{
                "ca": {"common_name": "ca.test.com"},
                "leaves": [{"common_name": "service.test.com", "san_ips": ["127.0.0.1"]}],
                "stages": {"count": 1, "name_prefix": "node", "domain": "test.com"}
            }"#,
        )
        .unwrap();
        let settings = SettingsLayer::defaults().merge(file).resolve().unwrap();
        let plan = settings.batch().unwrap();

        assert_eq!(plan.root.artifact_name, "ca");
        assert!(plan.root.role.is_ca);
        assert_eq!(plan.root.san.entries().len(), 1);

        let leaves: Vec<IssuanceRequest> = plan.leaves.into_iter().map(|leaf| leaf.unwrap()).collect();
        let names: Vec<_> = leaves.iter().map(|r| r.artifact_name.as_str()).collect();
        assert_eq!(names, vec!["service.test.com", "node-1"]);
        assert_eq!(leaves[0].san.entries().len(), 1);
        assert_eq!(leaves[1].validity_days, 365);
        assert_eq!(leaves[1].role, RoleFlags::leaf(true));
    }

    #[test]
    fn test_bad_leaf_does_not_block_the_others() {
        let mut settings = SettingsLayer::defaults().resolve().unwrap();
        settings.leaves = vec![
            LeafSpec {
                artifact_name: None,
                common_name: "good.test.com".into(),
                san_dns: vec![],
                san_ips: vec![],
            },
            LeafSpec {
                artifact_name: Some("bad".into()),
                common_name: "bad.test.com".into(),
                san_dns: vec![],
                san_ips: vec!["10.0.0.999".into()],
            },
            LeafSpec {
                artifact_name: None,
                common_name: "also-good.test.com".into(),
                san_dns: vec![],
                san_ips: vec!["10.0.0.9".into()],
            },
        ];

        let plan = settings.batch().unwrap();
        assert_eq!(plan.leaves.len(), 3);
        assert_eq!(plan.leaves[0].as_ref().unwrap().artifact_name, "good.test.com");
        match plan.leaves[1] {
            Err(ref failure) => {
                assert_eq!(failure.artifact_name, "bad");
                assert!(matches!(failure.error, Error::InvalidSan { .. }));
            }
            Ok(_) => panic!("invalid IP accepted"),
        }
        assert!(plan.leaves[2].is_ok());
    }

    #[test]
    fn test_stage_address_overflow_is_config_error() {
        let mut layer = SettingsLayer::defaults();
        layer.stages = Some(StageSpec {
            count: 1,
            name_prefix: "server".into(),
            domain: "test.com".into(),
            network_prefix: Some("10.0.0".into()),
            start_address: u32::MAX,
            extra_dns: vec![],
        });
        assert!(matches!(layer.clone().resolve(), Err(Error::Config(_))));

        let mut stages = layer.stages.take().unwrap();
        assert!(matches!(stages.leaf_specs(), Err(Error::Config(_))));

        stages.start_address = 250;
        stages.count = 6;
        assert!(matches!(stages.leaf_specs(), Err(Error::Config(_))));

        stages.network_prefix = None;
        stages.count = MAX_STAGE_COUNT + 1;
        assert!(matches!(stages.validate(), Err(Error::Config(_))));
    }
}
