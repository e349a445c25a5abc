use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use harvest_core::error::HarvestError;
use harvest_core::models::JobRecord;
use harvest_core::traits::{PublishedArtifact, ResultSink};
use tempfile::NamedTempFile;

const CSV_COLUMNS: &[&str] = &[
    "JOB_ID",
    "TITLE",
    "COMPANY",
    "LOCATION",
    "POSTED_DATE",
    "APPLY_URL",
    "EASY_APPLY",
    "APPLICANTS",
    "SALARY_RANGE",
    "DESCRIPTION",
    "RECRUITER_NAME",
    "RECRUITER_TITLE",
    "RECRUITER_PROFILE",
    "DEGRADED",
];

/// UTF-8 byte order mark, so spreadsheet tools pick the right encoding.
const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("Unknown output format '{other}'. Choices: json, csv")),
        }
    }
}

/// Writes each run to its own timestamped file and keeps a
/// `<label>_latest.<ext>` pointer at the newest one.
///
/// Both the artifact and the pointer are swapped in by rename, so readers
/// never see a partially written file.
#[derive(Debug, Clone)]
pub struct FileSink {
    out_dir: PathBuf,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(out_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            out_dir: out_dir.into(),
            format,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn write_records(&self, file: &mut File, records: &[JobRecord]) -> Result<(), HarvestError> {
        let mut writer = BufWriter::new(file);
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, records)?;
                writer.write_all(b"\n")?;
            }
            OutputFormat::Csv => write_csv(&mut writer, records)?,
        }
        writer.flush()?;
        Ok(())
    }

    /// First free `<label>_<stamp>[_n].<ext>` in the output directory.
    fn artifact_path(&self, label: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let ext = self.format.extension();
        let mut path = self.out_dir.join(format!("{label}_{stamp}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self.out_dir.join(format!("{label}_{stamp}_{n}.{ext}"));
            n += 1;
        }
        path
    }
}

impl ResultSink for FileSink {
    fn publish(&self, records: &[JobRecord], label: &str) -> Result<PublishedArtifact, HarvestError> {
        fs::create_dir_all(&self.out_dir).map_err(|e| {
            HarvestError::Sink(format!(
                "cannot create output directory {}: {e}",
                self.out_dir.display()
            ))
        })?;

        let label = sanitize_label(label);
        let path = self.artifact_path(&label);

        let mut tmp = NamedTempFile::new_in(&self.out_dir)?;
        self.write_records(tmp.as_file_mut(), records)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| HarvestError::Io(e.error))?;

        let latest = self
            .out_dir
            .join(format!("{label}_latest.{}", self.format.extension()));
        update_latest(&self.out_dir, &path, &latest)?;

        tracing::info!(
            path = %path.display(),
            latest = %latest.display(),
            records = records.len(),
            format = %self.format,
            "Published results"
        );

        Ok(PublishedArtifact {
            path,
            latest,
            records: records.len(),
        })
    }
}

/// Keep labels to a single safe path component.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "jobs".to_string() } else { cleaned }
}

fn update_latest(dir: &Path, artifact: &Path, latest: &Path) -> Result<(), HarvestError> {
    #[cfg(unix)]
    {
        match link_latest(dir, artifact, latest) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot symlink latest results, copying instead");
            }
        }
    }
    copy_latest(dir, artifact, latest)
}

/// Create the link under a temporary name, then rename it over `latest`.
#[cfg(unix)]
fn link_latest(dir: &Path, artifact: &Path, latest: &Path) -> io::Result<()> {
    let target = artifact.file_name().map(PathBuf::from).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name")
    })?;
    let staging = dir.join(format!(
        ".{}.{}.tmp",
        latest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        std::process::id()
    ));

    if fs::symlink_metadata(&staging).is_ok() {
        fs::remove_file(&staging)?;
    }
    std::os::unix::fs::symlink(&target, &staging)?;
    if let Err(e) = fs::rename(&staging, latest) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    Ok(())
}

fn copy_latest(dir: &Path, artifact: &Path, latest: &Path) -> Result<(), HarvestError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    let mut source = File::open(artifact)?;
    io::copy(&mut source, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(latest).map_err(|e| HarvestError::Io(e.error))?;
    Ok(())
}

fn write_csv<W: Write>(writer: &mut W, records: &[JobRecord]) -> Result<(), HarvestError> {
    writer.write_all(BOM)?;
    let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);
    let csv_error = |e: csv::Error| HarvestError::Sink(format!("CSV write failed: {e}"));

    csv_writer.write_record(CSV_COLUMNS).map_err(csv_error)?;
    for record in records {
        csv_writer.write_record(csv_row(record)).map_err(csv_error)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn csv_row(record: &JobRecord) -> Vec<String> {
    let summary = &record.summary;
    let recruiter = record.recruiter.as_ref();
    let cell = |value: Option<&String>| value.map(String::as_str).map(flatten_newlines).unwrap_or_default();

    vec![
        summary.job_id.clone(),
        flatten_newlines(&summary.title),
        flatten_newlines(&summary.company),
        cell(summary.location.as_ref()),
        cell(summary.posted_date.as_ref()),
        cell(summary.apply_url.as_ref()),
        record.is_easy_apply.to_string(),
        cell(record.applicants.as_ref()),
        cell(record.salary_range.as_ref()),
        cell(record.description.as_ref()),
        cell(recruiter.and_then(|r| r.name.as_ref())),
        cell(recruiter.and_then(|r| r.title.as_ref())),
        cell(recruiter.and_then(|r| r.profile_url.as_ref())),
        record.degraded.to_string(),
    ]
}

fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "; ")
}
