//! History export: accepted samples as CSV, session digest as JSON.
//!
//! Files land in the configured output directory as
//! `session_<YYYYmmdd_HHMMSS>_<id8>.csv` and the matching `.json`.

use crate::error::AppResult;
use crate::sample::Sample;
use crate::session::{SessionStateStore, SessionSummary};
use chrono::Utc;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// CSV column names, in order.
pub const CSV_HEADER: [&str; 6] = [
    "timestamp",
    "raw_high",
    "raw_low",
    "load_kg",
    "load_tons",
    "load_kn",
];

/// Paths written by [`HistoryExporter::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Sample history
    pub csv: PathBuf,
    /// Session digest
    pub summary: PathBuf,
}

/// Writes session history into a directory.
#[derive(Debug, Clone)]
pub struct HistoryExporter {
    output_dir: PathBuf,
}

impl HistoryExporter {
    /// Export into `output_dir`, created on first use.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Target directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the session's samples and summary.
    pub fn export(&self, session: &SessionStateStore) -> AppResult<ExportPaths> {
        std::fs::create_dir_all(&self.output_dir)?;

        let id = session.session_id().simple().to_string();
        let stem = format!(
            "session_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &id[..8]
        );
        let paths = ExportPaths {
            csv: self.output_dir.join(format!("{stem}.csv")),
            summary: self.output_dir.join(format!("{stem}.json")),
        };

        write_samples(BufWriter::new(File::create(&paths.csv)?), session.samples())?;
        write_summary(
            BufWriter::new(File::create(&paths.summary)?),
            &session.summary(),
        )?;

        info!(
            csv = %paths.csv.display(),
            summary = %paths.summary.display(),
            samples = session.samples().len(),
            "session history exported"
        );
        Ok(paths)
    }
}

/// Write samples as CSV with a header row.
#[cfg(feature = "storage_csv")]
pub fn write_samples<W: Write>(out: W, samples: &[Sample]) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_HEADER)?;
    for sample in samples {
        writer.write_record(&[
            sample.timestamp().to_rfc3339(),
            sample.raw_high().to_string(),
            sample.raw_low().to_string(),
            format!("{:.1}", sample.load_kg()),
            format!("{:.3}", sample.load_tons()),
            format!("{:.3}", sample.load_kn()),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write samples as CSV with a header row.
#[cfg(not(feature = "storage_csv"))]
pub fn write_samples<W: Write>(_out: W, _samples: &[Sample]) -> AppResult<()> {
    Err(crate::error::DaqError::FeatureNotEnabled(
        "storage_csv".to_string(),
    ))
}

/// Write the summary as pretty JSON.
pub fn write_summary<W: Write>(mut out: W, summary: &SessionSummary) -> AppResult<()> {
    serde_json::to_writer_pretty(&mut out, summary)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::sample::RegisterPair;
    use chrono::TimeZone;

    fn samples() -> Vec<Sample> {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        vec![
            Sample::from_registers(RegisterPair::new(0, 500), t0),
            Sample::from_registers(
                RegisterPair::new(0, 700),
                t0 + chrono::Duration::seconds(2),
            ),
        ]
    }

    #[test]
    fn writes_header_and_rows() {
        let mut buf = Vec::new();
        write_samples(&mut buf, &samples()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "timestamp,raw_high,raw_low,load_kg,load_tons,load_kn");
        assert_eq!(
            lines[1],
            "2024-05-01T10:00:00+00:00,0,500,5000.0,5.000,49.033"
        );
        assert_eq!(
            lines[2],
            "2024-05-01T10:00:02+00:00,0,700,7000.0,7.000,68.647"
        );
    }

    #[test]
    fn exports_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStateStore::default();
        for sample in samples() {
            session.ingest(sample);
        }

        let exporter = HistoryExporter::new(dir.path().join("out"));
        let paths = exporter.export(&session).unwrap();

        let csv_text = std::fs::read_to_string(&paths.csv).unwrap();
        assert_eq!(csv_text.lines().count(), 3);

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.summary).unwrap()).unwrap();
        assert_eq!(summary["sample_count"], 2);
        assert_eq!(summary["peak_tons"], 7.0);
        assert!(summary["proof_load_tons"].is_null());
    }
}
