use crate::ca::CertificateAuthority;
use crate::cert::{CertificateBuilder, DEFAULT_LEAF_VALIDITY_DAYS, DEFAULT_ROOT_VALIDITY_DAYS};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::export::{ArtifactExporter, ArtifactNaming, ArtifactSet};
use crate::inspect::{display_summaries, inspect_pem, OutputFormat};
use crate::key::{DEFAULT_KEY_LENGTH_BITS, DEFAULT_PUBLIC_EXPONENT};
use crate::x509::Certificate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certforge")]
#[command(version, about = "Issue an internal RSA root CA and the leaf certificates it signs", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Log debug output")]
    pub verbose: bool,

    #[arg(short, long, global = true, conflicts_with = "verbose", help = "Disable logging")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Issue a root CA and every configured leaf")]
    Batch {
        #[arg(short, long, help = "JSON settings file")]
        config: Option<PathBuf>,

        #[arg(short, long, help = "Override the output directory")]
        output_dir: Option<PathBuf>,
    },

    #[command(about = "Issue a self-signed root CA")]
    Root {
        #[arg(long, help = "Common name for the CA")]
        cn: String,

        #[arg(short = 'C', long, default_value = "US", help = "Country code (2 letters)")]
        country: String,

        #[arg(long, help = "Extra DNS Subject Alternative Names", value_delimiter = ',')]
        dns: Vec<String>,

        #[arg(long, help = "IP Subject Alternative Names", value_delimiter = ',')]
        ip: Vec<String>,

        #[arg(short, long, default_value_t = DEFAULT_ROOT_VALIDITY_DAYS, help = "Validity in days")]
        validity: u32,

        #[arg(long, default_value_t = DEFAULT_KEY_LENGTH_BITS, help = "RSA modulus size in bits")]
        key_length: usize,

        #[arg(long, default_value_t = DEFAULT_PUBLIC_EXPONENT, help = "RSA public exponent")]
        exponent: u64,

        #[arg(short, long, default_value = "tls", help = "Output directory")]
        out_dir: PathBuf,

        #[arg(short, long, default_value = "ca", help = "Artifact base name")]
        name: String,
    },

    #[command(about = "Issue a leaf certificate from a CA on disk")]
    Leaf {
        #[arg(long, help = "CA certificate path")]
        ca_cert: PathBuf,

        #[arg(long, help = "CA private key path")]
        ca_key: PathBuf,

        #[arg(long, help = "Common name (defaults to the first DNS name)")]
        cn: Option<String>,

        #[arg(short = 'C', long, default_value = "US", help = "Country code (2 letters)")]
        country: String,

        #[arg(short, long, help = "DNS Subject Alternative Names", value_delimiter = ',')]
        dns: Vec<String>,

        #[arg(short, long, help = "IP Subject Alternative Names", value_delimiter = ',')]
        ip: Vec<String>,

        #[arg(short, long, default_value_t = DEFAULT_LEAF_VALIDITY_DAYS, help = "Validity in days")]
        validity: u32,

        #[arg(long, default_value_t = DEFAULT_KEY_LENGTH_BITS, help = "RSA modulus size in bits")]
        key_length: usize,

        #[arg(long, default_value_t = DEFAULT_PUBLIC_EXPONENT, help = "RSA public exponent")]
        exponent: u64,

        #[arg(long, help = "Omit Key Encipherment from the key usage")]
        no_key_encipherment: bool,

        #[arg(short, long, default_value = "tls", help = "Output directory")]
        out_dir: PathBuf,

        #[arg(short, long, help = "Artifact base name (defaults to the common name)")]
        name: Option<String>,

        #[arg(long, default_value = "ca", help = "Suffix of the chain file")]
        ca_suffix: String,
    },

    #[command(about = "Show every certificate in a PEM file")]
    Inspect {
        #[arg(help = "PEM file path")]
        path: PathBuf,

        #[arg(short, long, default_value = "pretty", help = "Output format: pretty or json")]
        format: OutputFormat,
    },

    #[command(about = "Check that a certificate was signed by a CA")]
    Verify {
        #[arg(long, help = "CA certificate path")]
        ca: PathBuf,

        #[arg(help = "Certificate path")]
        cert: PathBuf,
    },
}

/// `RUST_LOG` wins; otherwise `info`, or `debug`/`off` for the flags.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let fallback = if quiet {
        "off"
    } else if verbose {
        "certforge=debug"
    } else {
        "certforge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Batch { config, output_dir } => {
            let mut settings = Settings::load(config.as_deref())?;
            if let Some(dir) = output_dir {
                settings.output.directory = dir;
            }

            let plan = settings.batch()?;
            let total = plan.leaves.len();
            let report = settings.orchestrator().issue_plan(plan)?;

            println!("{}", "Root CA created successfully!".green().bold());
            print_artifacts(&report.ca_artifacts);
            println!("  {}: {}", "Serial".cyan(), report.ca.certificate().serial_hex());

            for bundle in &report.bundles {
                println!("{} {}", "Issued".green().bold(), bundle.artifact_name);
                print_artifacts(&bundle.artifacts);
            }
            for failure in &report.failures {
                println!("{} {}: {}", "Failed".red().bold(), failure.artifact_name, failure.error);
            }

            if !report.is_complete() {
                return Err(Error::InvalidInput(format!(
                    "{} of {} leaf certificates failed",
                    report.failures.len(),
                    total
                )));
            }
        }

        Commands::Root {
            cn,
            country,
            dns,
            ip,
            validity,
            key_length,
            exponent,
            out_dir,
            name,
        } => {
            let request = CertificateBuilder::root(cn.clone())
                .with_country(country)
                .with_dns_san(cn)
                .with_dns_sans(dns)
                .with_validity_days(validity)
                .with_key_length(key_length)
                .with_public_exponent(exponent)
                .with_artifact_name(name.clone());
            let request = ip.into_iter().fold(request, |b, ip| b.with_ip_san(ip)).build()?;

            let ca = CertificateAuthority::new_root(&request)?;
            let artifacts = ArtifactExporter::new(out_dir, ArtifactNaming::default()).export(
                &name,
                ca.key_pair(),
                ca.certificate(),
                None,
            )?;

            println!("{}", "Root CA created successfully!".green().bold());
            print_artifacts(&artifacts);
            println!("  {}: {}", "Serial".cyan(), ca.certificate().serial_hex());
            println!("  {}: {} days", "Validity".cyan(), validity);
        }

        Commands::Leaf {
            ca_cert,
            ca_key,
            cn,
            country,
            dns,
            ip,
            validity,
            key_length,
            exponent,
            no_key_encipherment,
            out_dir,
            name,
            ca_suffix,
        } => {
            let ca = CertificateAuthority::load_pem(ca_cert, ca_key)?;

            let cn = cn
                .or_else(|| dns.first().cloned())
                .ok_or_else(|| Error::InvalidInput("a common name or at least one DNS name is required".into()))?;

            let mut builder = CertificateBuilder::leaf(cn)
                .with_country(country)
                .with_dns_sans(dns)
                .with_validity_days(validity)
                .with_key_length(key_length)
                .with_public_exponent(exponent)
                .with_key_encipherment(!no_key_encipherment);
            for address in ip {
                builder = builder.with_ip_san(address);
            }
            if let Some(name) = name {
                builder = builder.with_artifact_name(name);
            }
            let request = builder.build()?;

            let issued = ca.issue_leaf(&request)?;
            let naming = ArtifactNaming {
                ca_suffix,
                ..ArtifactNaming::default()
            };
            let artifacts = ArtifactExporter::new(out_dir, naming).export(
                &request.artifact_name,
                &issued.key_pair,
                &issued.certificate,
                Some(ca.certificate()),
            )?;

            println!("{}", "Certificate issued successfully!".green().bold());
            print_artifacts(&artifacts);
            println!("  {}: {}", "Serial".cyan(), issued.certificate.serial_hex());
        }

        Commands::Inspect { path, format } => {
            let pem = std::fs::read_to_string(path)?;
            let summaries = inspect_pem(&pem)?;
            println!("{}", display_summaries(&summaries, format)?);
        }

        Commands::Verify { ca, cert } => {
            let ca_cert = Certificate::from_pem(&std::fs::read_to_string(&ca)?)?;
            let certificate = Certificate::from_pem(&std::fs::read_to_string(&cert)?)?;

            certificate.verify_signed_by(&ca_cert)?;
            match (certificate.authority_key_id()?, ca_cert.subject_key_id()?) {
                (Some(aki), Some(ski)) if aki == ski => {}
                (Some(aki), Some(ski)) => {
                    return Err(Error::Verification(format!(
                        "authority key id {} does not match CA subject key id {}",
                        aki, ski
                    )))
                }
                _ => {
                    return Err(Error::Verification(
                        "missing authority or subject key identifier".into(),
                    ))
                }
            }

            println!("{}", "Certificate verified successfully!".green().bold());
            println!("  {}: {}", "Certificate".cyan(), cert.display());
            println!("  {}: {}", "Issuer".cyan(), ca.display());
        }
    }

    Ok(())
}

fn print_artifacts(artifacts: &ArtifactSet) {
    println!("  {}: {}", "Certificate".cyan(), artifacts.certificate.display());
    println!("  {}: {}", "Private Key".cyan(), artifacts.key.display());
    println!("  {}: {}", "Combined PEM".cyan(), artifacts.combined.display());
    if let Some(ref chain) = artifacts.chain {
        println!("  {}: {}", "Full Chain".cyan(), chain.display());
    }
}
