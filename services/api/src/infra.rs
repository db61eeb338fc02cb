use chrono::Utc;
use clearance::workflows::clearance::{
    CertificateArtifact, CertificateError, CertificateRenderer, Department, Student,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes a plain-text certificate per student under `dir`.
#[derive(Debug, Clone)]
pub(crate) struct FileCertificateRenderer {
    dir: PathBuf,
}

impl FileCertificateRenderer {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Escapes every byte outside `[A-Za-z0-9-]` as `_xx`, so distinct ids
/// never share a file.
fn file_stem(student: &Student) -> String {
    let mut stem = String::with_capacity(student.id.0.len());
    for byte in student.id.0.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "_{byte:02x}");
        }
    }
    stem
}

impl CertificateRenderer for FileCertificateRenderer {
    fn render(&self, student: &Student) -> Result<CertificateArtifact, CertificateError> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| CertificateError::Unavailable(format!("{}: {err}", self.dir.display())))?;

        let issued_at = Utc::now();
        let mut body = format!(
            "CERTIFICATE OF CLEARANCE\n\nThis certifies that {} ({}) has been cleared by:\n",
            student.name, student.id
        );
        for department in Department::ALL {
            body.push_str(&format!("  - {}\n", department.label()));
        }
        body.push_str(&format!("\nIssued {}\n", issued_at.format("%Y-%m-%d %H:%M UTC")));

        let path = self.dir.join(format!("{}.txt", file_stem(student)));
        fs::write(&path, body)
            .map_err(|err| CertificateError::Render(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "certificate written");

        Ok(CertificateArtifact {
            reference: path.display().to_string(),
            issued_at,
        })
    }
}
