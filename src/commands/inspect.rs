use anyhow::Result;
use std::path::PathBuf;

use crate::backup::config;
use crate::backup::key::KeyLayout;
use crate::backup::media::LocalFileRecord;
use crate::commands::{CommandReport, build_extractor};

/// Show the capture time and derived key of each file without touching the bucket.
pub fn run(paths: &[PathBuf]) -> Result<CommandReport> {
    let cfg = config::load_config()?;
    let layout = KeyLayout::new(&cfg.remote.key_prefix);
    let (extractor, ffprobe) = build_extractor(&cfg);
    let mut report = CommandReport::new("inspect");

    if ffprobe.is_none() {
        report.detail("ffprobe=unavailable (videos fall back to mtime)");
    }

    for path in paths {
        let record = match LocalFileRecord::from_path(path) {
            Ok(record) => record,
            Err(err) => {
                report.issue(format!("{}: unreadable ({err})", path.display()));
                continue;
            }
        };
        let captured = extractor.extract(&record);
        let key = layout.derive(&captured.at, &record.filename);
        report.detail(format!(
            "{} category={} captured={} provenance={} key={key}",
            record.path.display(),
            record.category,
            captured.at.format("%Y-%m-%d %H:%M:%S"),
            captured.provenance,
        ));
    }

    Ok(report)
}
