use crate::export::ArtifactFailure;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Certificate request has no subject alternative names")]
    EmptySan,

    #[error("Invalid subject alternative name '{entry}': {reason}")]
    InvalidSan { entry: String, reason: String },

    #[error("Extension planning error: {0}")]
    ExtensionPlanning(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Failed to write {} artifact(s): {}", .0.len(), ArtifactFailure::join(.0))]
    ArtifactWrite(Vec<ArtifactFailure>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Certificate parsing error: {0}")]
    CertParse(String),

    #[error("Certificate verification failed: {0}")]
    Verification(String),
}

impl Error {
    pub(crate) fn invalid_san(entry: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidSan {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<rsa::pkcs1::Error> for Error {
    fn from(err: rsa::pkcs1::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<rsa::pkcs8::Error> for Error {
    fn from(err: rsa::pkcs8::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<spki::Error> for Error {
    fn from(err: spki::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<x509_parser::error::X509Error> for Error {
    fn from(err: x509_parser::error::X509Error) -> Self {
        Error::CertParse(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::CertParse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
