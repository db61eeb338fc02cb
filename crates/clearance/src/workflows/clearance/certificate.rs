use super::domain::{CertificateArtifact, Student};

/// External collaborator producing the clearance certificate artifact.
pub trait CertificateRenderer: Send + Sync {
    fn render(&self, student: &Student) -> Result<CertificateArtifact, CertificateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate renderer unavailable: {0}")]
    Unavailable(String),
    #[error("certificate rendering failed: {0}")]
    Render(String),
}

/// What the aggregator did about the certificate on this evaluation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CertificateOutcome {
    /// Not every department has signed off yet.
    NotEligible,
    /// Rendered and recorded during this evaluation.
    Issued { artifact: CertificateArtifact },
    /// Issued earlier, or another evaluation is issuing it right now.
    AlreadyIssued,
    /// The renderer failed; clearance stands and issuance can be retried.
    Failed { reason: String },
}
