//! Batch issuance: one root CA, then any number of leaves under it.
//!
//! The root is issued and exported first and any failure there aborts the
//! batch. Leaves are independent: a failed leaf is recorded in the
//! [`BatchReport`] and the rest still run, optionally on a bounded pool of
//! scoped threads. Results always come back in request order.

use crate::ca::CertificateAuthority;
use crate::error::{Error, Result};
use crate::export::{ArtifactExporter, ArtifactSet};
use crate::types::IssuanceRequest;
use crate::x509::Certificate;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

pub const MAX_WORKERS: usize = 64;

/// A leaf and the certificate that issued it.
#[derive(Debug, Clone)]
pub struct ChainBundle {
    pub artifact_name: String,
    pub leaf: Certificate,
    pub issuer: Arc<Certificate>,
    pub artifacts: ArtifactSet,
}

impl ChainBundle {
    /// Leaf PEM followed by issuer PEM.
    pub fn to_pem(&self) -> Result<String> {
        Ok(format!("{}{}", self.leaf.to_pem()?, self.issuer.to_pem()?))
    }
}

#[derive(Debug)]
pub struct LeafFailure {
    pub artifact_name: String,
    pub error: Error,
}

/// A leaf as planned from settings: a request ready to issue, or the reason
/// it could not be built.
pub type PlannedLeaf = std::result::Result<IssuanceRequest, LeafFailure>;

/// A root request plus the leaves to issue under it, in request order.
#[derive(Debug)]
pub struct BatchPlan {
    pub root: IssuanceRequest,
    pub leaves: Vec<PlannedLeaf>,
}

#[derive(Debug)]
pub struct LeafOutcome {
    pub bundles: Vec<ChainBundle>,
    pub failures: Vec<LeafFailure>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub ca: CertificateAuthority,
    pub ca_artifacts: ArtifactSet,
    pub bundles: Vec<ChainBundle>,
    pub failures: Vec<LeafFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct IssuanceOrchestrator {
    exporter: ArtifactExporter,
    workers: usize,
}

impl IssuanceOrchestrator {
    pub fn new(exporter: ArtifactExporter) -> Self {
        Self { exporter, workers: 1 }
    }

    /// Clamped to `1..=MAX_WORKERS`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn exporter(&self) -> &ArtifactExporter {
        &self.exporter
    }

    pub fn issue_batch(&self, root_request: &IssuanceRequest, leaf_requests: &[IssuanceRequest]) -> Result<BatchReport> {
        self.issue_plan(BatchPlan {
            root: root_request.clone(),
            leaves: leaf_requests.iter().cloned().map(Ok).collect(),
        })
    }

    /// Like [`issue_batch`](Self::issue_batch), but leaves that could not be
    /// built are reported as failures in their place instead of stopping
    /// the batch.
    pub fn issue_plan(&self, plan: BatchPlan) -> Result<BatchReport> {
        let ca = CertificateAuthority::new_root(&plan.root)?;
        let ca_artifacts = self
            .exporter
            .export(&plan.root.artifact_name, ca.key_pair(), ca.certificate(), None)?;
        info!(name = %plan.root.artifact_name, "root CA ready");

        let reserved = ca_artifacts.paths().map(Path::to_path_buf).collect();
        let outcome = self.run_leaves(&ca, plan.leaves, reserved);

        Ok(BatchReport {
            ca,
            ca_artifacts,
            bundles: outcome.bundles,
            failures: outcome.failures,
        })
    }

    /// Leaf phase against an existing CA, e.g. one loaded from disk.
    pub fn issue_leaves(&self, ca: &CertificateAuthority, leaf_requests: &[IssuanceRequest]) -> LeafOutcome {
        self.run_leaves(ca, leaf_requests.iter().cloned().map(Ok).collect(), HashSet::new())
    }

    fn run_leaves(&self, ca: &CertificateAuthority, leaves: Vec<PlannedLeaf>, mut reserved: HashSet<PathBuf>) -> LeafOutcome {
        let issuer = Arc::new(ca.certificate().clone());

        // No two artifact sets in a batch may share a file. A leaf whose
        // files overlap an earlier one fails and reserves nothing.
        let conflicts: Vec<Option<PathBuf>> = leaves
            .iter()
            .map(|leaf| {
                let request = leaf.as_ref().ok()?;
                let planned = self.exporter.paths(&request.artifact_name, true);
                let clash = planned.paths().find(|path| reserved.contains(*path)).map(Path::to_path_buf);
                if clash.is_none() {
                    reserved.extend(planned.paths().map(Path::to_path_buf));
                }
                clash
            })
            .collect();

        // None for leaves rejected before issuance.
        let results = self.map_ordered(&leaves, |index, leaf| {
            let request = leaf.as_ref().ok()?;
            if let Some(ref path) = conflicts[index] {
                return Some(Err(Error::InvalidInput(format!(
                    "artifact '{}' would overwrite {}, already used in this batch",
                    request.artifact_name,
                    path.display()
                ))));
            }
            Some(self.issue_one(ca, &issuer, request))
        });

        let mut outcome = LeafOutcome {
            bundles: Vec::new(),
            failures: Vec::new(),
        };
        for (leaf, result) in leaves.into_iter().zip(results) {
            let failure = match (leaf, result) {
                (Err(failure), _) => {
                    warn!(name = %failure.artifact_name, error = %failure.error, "leaf request rejected");
                    failure
                }
                (Ok(_), Some(Ok(bundle))) => {
                    outcome.bundles.push(bundle);
                    continue;
                }
                (Ok(request), Some(Err(error))) => {
                    warn!(name = %request.artifact_name, %error, "leaf issuance failed");
                    LeafFailure {
                        artifact_name: request.artifact_name,
                        error,
                    }
                }
                (Ok(_), None) => continue,
            };
            outcome.failures.push(failure);
        }

        info!(
            issued = outcome.bundles.len(),
            failed = outcome.failures.len(),
            "leaf phase finished"
        );
        outcome
    }

    fn issue_one(&self, ca: &CertificateAuthority, issuer: &Arc<Certificate>, request: &IssuanceRequest) -> Result<ChainBundle> {
        let issued = ca.issue_leaf(request)?;
        let artifacts = self.exporter.export(
            &request.artifact_name,
            &issued.key_pair,
            &issued.certificate,
            Some(issuer.as_ref()),
        )?;
        Ok(ChainBundle {
            artifact_name: request.artifact_name.clone(),
            leaf: issued.certificate,
            issuer: Arc::clone(issuer),
            artifacts,
        })
    }

    // Applies `f` to every item, splitting the work across at most
    // `self.workers` scoped threads. Output order matches input order.
    fn map_ordered<I, T, F>(&self, items: &[I], f: F) -> Vec<T>
    where
        I: Sync,
        T: Send,
        F: Fn(usize, &I) -> T + Sync,
    {
        if self.workers <= 1 || items.len() <= 1 {
            return items.iter().enumerate().map(|(i, item)| f(i, item)).collect();
        }

        let chunk_size = items.len().div_ceil(self.workers);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .enumerate()
                .map(|(chunk_index, chunk)| {
                    scope.spawn(move || {
                        let offset = chunk_index * chunk_size;
                        chunk
                            .iter()
                            .enumerate()
                            .map(|(i, item)| f(offset + i, item))
                            .collect::<Vec<T>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(results) => results,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}
