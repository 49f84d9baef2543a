use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no reports found in {} -- save one from a profiled process first", .0.display())]
    NoReports(PathBuf),

    #[error("failed to read report file {}: {source}", path.display())]
    ReportReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid report data in {}: {reason}", path.display())]
    InvalidReportData { path: PathBuf, reason: String },

    #[error("unknown report section '{0}' -- expected stacks, methods or triggers")]
    UnknownSection(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
