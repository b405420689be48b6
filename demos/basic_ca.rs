use certforge::ca::CertificateAuthority;
use certforge::cert::CertificateBuilder;
use certforge::export::{ArtifactExporter, ArtifactNaming};
use certforge::inspect::{display_summaries, inspect_pem, OutputFormat};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let exporter = ArtifactExporter::new("demo-tls", ArtifactNaming::default());

    println!("Creating a Root CA...");

    let root_request = CertificateBuilder::root("ca.example.com")
        .with_dns_san("ca.example.com")
        .with_key_length(2048)
        .with_artifact_name("ca")
        .build()?;
    let ca = CertificateAuthority::new_root(&root_request)?;
    exporter.export("ca", ca.key_pair(), ca.certificate(), None)?;
    println!("Root CA created and saved!");

    println!("\nIssuing a server certificate...");

    let server = CertificateBuilder::leaf("service.example.com")
        .with_dns_san("service.example.com")
        .with_dns_san("api.example.com")
        .with_ip_san("127.0.0.1")
        .with_key_length(2048)
        .with_validity_days(365)
        .issue(&ca)?;
    let artifacts = exporter.export("service", &server.key_pair, &server.certificate, Some(ca.certificate()))?;
    println!("Server certificate issued!");

    let chain = std::fs::read_to_string(artifacts.chain.as_ref().ok_or("missing chain file")?)?;
    println!("{}", display_summaries(&inspect_pem(&chain)?, OutputFormat::Pretty)?);

    println!("Files created:");
    for path in artifacts.paths() {
        println!("  - {}", path.display());
    }

    Ok(())
}
