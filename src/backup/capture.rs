//! Capture-time extraction.
//!
//! Each source of a timestamp is one attempt yielding
//! `Result<NaiveDateTime, ExtractError>`; attempts are tried in order and
//! the first success wins. When every attempt fails the filesystem
//! modification time recorded during enumeration is used instead, so
//! [`MetadataExtractor::extract`] always produces a timestamp.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use exif::{In, Tag, Value};
use serde::Deserialize;

use crate::backup::media::{LocalFileRecord, MediaCategory};
use crate::backup::util::run_command_with_optional_timeout;
use crate::backup::warn::{self, WarnEvent};
use crate::error::ExtractError;

pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";
pub const PROBE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const PROBE_DATETIME_LEN: usize = 19;

pub const CREATION_TIME_TAG: &str = "creation_time";
pub const QUICKTIME_CREATION_DATE_TAG: &str = "com.apple.quicktime.creationdate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    EmbeddedMetadata,
    FilesystemMtime,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddedMetadata => "embedded-metadata",
            Self::FilesystemMtime => "filesystem-mtime",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimestamp {
    pub at: NaiveDateTime,
    pub provenance: Provenance,
}

impl CaptureTimestamp {
    pub fn embedded(at: NaiveDateTime) -> Self {
        Self {
            at,
            provenance: Provenance::EmbeddedMetadata,
        }
    }

    pub fn from_mtime(modified: SystemTime) -> Self {
        Self {
            at: DateTime::<Local>::from(modified).naive_local(),
            provenance: Provenance::FilesystemMtime,
        }
    }
}

pub type Attempt = Result<NaiveDateTime, ExtractError>;

/// First successful attempt, or every failure in the order tried.
pub fn first_success<I>(attempts: I) -> Result<NaiveDateTime, Vec<ExtractError>>
where
    I: IntoIterator<Item = Attempt>,
{
    let mut failures = Vec::new();
    for attempt in attempts {
        match attempt {
            Ok(at) => return Ok(at),
            Err(err) => failures.push(err),
        }
    }
    Err(failures)
}

/// Structured container description as reported by a media prober.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ProbeReport {
    #[serde(default)]
    pub format: ProbeSection,
    #[serde(default)]
    pub streams: Vec<ProbeSection>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ProbeSection {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

pub trait VideoProber {
    fn probe(&self, path: &Path) -> Result<ProbeReport, ExtractError>;
}

/// Runs `ffprobe` and parses its JSON report.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    bin: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

impl FfprobeProber {
    pub fn new(configured_bin: Option<&Path>, timeout_secs: Option<u64>) -> Self {
        let bin = match configured_bin {
            Some(bin) if bin.exists() => Some(bin.to_path_buf()),
            _ => which::which("ffprobe").ok(),
        };
        Self { bin, timeout_secs }
    }

    pub fn bin(&self) -> Option<&Path> {
        self.bin.as_deref()
    }
}

impl VideoProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<ProbeReport, ExtractError> {
        let Some(bin) = &self.bin else {
            return Err(ExtractError::ProbeUnavailable(
                "ffprobe not found in SHOEBOX_FFPROBE_BIN or PATH".to_string(),
            ));
        };
        let mut cmd = Command::new(bin);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        let output = run_command_with_optional_timeout(&mut cmd, self.timeout_secs)
            .map_err(|err| ExtractError::ProbeFailed(format!("{err:#}")))?;
        if !output.status.success() {
            return Err(ExtractError::ProbeFailed(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|err| ExtractError::ProbeFailed(format!("unreadable ffprobe json: {err}")))
    }
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Parse a probe date-time, ignoring anything past `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_probe_datetime(raw: &str) -> Attempt {
    let trimmed = truncate_chars(raw.trim(), PROBE_DATETIME_LEN);
    NaiveDateTime::parse_from_str(trimmed, PROBE_DATETIME_FORMAT).map_err(|_| {
        ExtractError::Unparsable {
            value: raw.to_string(),
            format: PROBE_DATETIME_FORMAT,
        }
    })
}

/// QuickTime creation dates carry an offset (`+0200`); drop it before parsing.
pub fn parse_quicktime_creation_date(raw: &str) -> Attempt {
    let without_offset = raw.split('+').next().unwrap_or(raw);
    parse_probe_datetime(without_offset)
}

fn tag_attempt(tags: &BTreeMap<String, String>, tag: &str, parse: fn(&str) -> Attempt) -> Attempt {
    match tags.get(tag) {
        Some(value) => parse(value),
        None => Err(ExtractError::MissingTag(tag.to_string())),
    }
}

/// Video tag precedence: format `creation_time`, each stream's
/// `creation_time`, then the QuickTime vendor tag.
pub fn video_capture_time(report: &ProbeReport) -> Result<NaiveDateTime, Vec<ExtractError>> {
    let format_tags = &report.format.tags;
    let format_attempt = std::iter::once_with(|| {
        tag_attempt(format_tags, CREATION_TIME_TAG, parse_probe_datetime)
    });
    let stream_attempts = report
        .streams
        .iter()
        .map(|stream| tag_attempt(&stream.tags, CREATION_TIME_TAG, parse_probe_datetime));
    let vendor_attempt = std::iter::once_with(|| {
        tag_attempt(format_tags, QUICKTIME_CREATION_DATE_TAG, parse_quicktime_creation_date)
    });
    first_success(format_attempt.chain(stream_attempts).chain(vendor_attempt))
}

fn exif_ascii(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()),
        _ => None,
    }
}

/// `DateTimeOriginal` from the file's EXIF container.
pub fn image_capture_time(path: &Path) -> Attempt {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader)?;
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .ok_or_else(|| ExtractError::MissingTag("DateTimeOriginal".to_string()))?;
    let raw = exif_ascii(&field.value)
        .ok_or_else(|| ExtractError::MissingTag("DateTimeOriginal".to_string()))?;
    NaiveDateTime::parse_from_str(raw.trim(), EXIF_DATETIME_FORMAT).map_err(|_| {
        ExtractError::Unparsable {
            value: raw,
            format: EXIF_DATETIME_FORMAT,
        }
    })
}

pub struct MetadataExtractor {
    prober: Box<dyn VideoProber>,
}

impl MetadataExtractor {
    pub fn new(prober: Box<dyn VideoProber>) -> Self {
        Self { prober }
    }

    pub fn extract(&self, file: &LocalFileRecord) -> CaptureTimestamp {
        match file.category {
            MediaCategory::Image => match image_capture_time(&file.path) {
                Ok(at) => CaptureTimestamp::embedded(at),
                Err(err) => {
                    tracing::debug!(path = %file.path.display(), "no embedded capture time: {err}");
                    CaptureTimestamp::from_mtime(file.modified)
                }
            },
            MediaCategory::Video => {
                let resolved = self
                    .prober
                    .probe(&file.path)
                    .map_err(|err| vec![err])
                    .and_then(|report| video_capture_time(&report));
                match resolved {
                    Ok(at) => CaptureTimestamp::embedded(at),
                    Err(failures) => {
                        let detail = failures
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("; ");
                        warn::emit(WarnEvent {
                            code: "VIDEO_TIME_FALLBACK",
                            stage: "extract",
                            path: &file.path.display().to_string(),
                            reason: "no-creation-time-metadata-using-mtime",
                            err: &detail,
                        });
                        CaptureTimestamp::from_mtime(file.modified)
                    }
                }
            }
            MediaCategory::Other => CaptureTimestamp::from_mtime(file.modified),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    /// Prober returning a fixed report, or failing when none is given.
    pub(crate) struct CannedProber(pub Option<ProbeReport>);

    impl VideoProber for CannedProber {
        fn probe(&self, _path: &Path) -> Result<ProbeReport, ExtractError> {
            self.0
                .clone()
                .ok_or_else(|| ExtractError::ProbeUnavailable("canned".to_string()))
        }
    }

    pub(crate) fn report(format: &[(&str, &str)], streams: &[&[(&str, &str)]]) -> ProbeReport {
        let section = |tags: &[(&str, &str)]| ProbeSection {
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        ProbeReport {
            format: section(format),
            streams: streams.iter().map(|tags| section(*tags)).collect(),
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .expect("valid date")
    }

    fn record(path: &Path, category: MediaCategory, modified: SystemTime) -> LocalFileRecord {
        LocalFileRecord {
            path: path.to_path_buf(),
            filename: path.file_name().unwrap().to_string_lossy().to_string(),
            size: 0,
            category,
            modified,
        }
    }

    #[test]
    fn format_creation_time_beats_stream_tag() {
        let both = report(
            &[("creation_time", "2023-05-01T10:00:00Z")],
            &[&[("creation_time", "2023-05-02T11:00:00Z")]],
        );
        assert_eq!(video_capture_time(&both).expect("time"), at(2023, 5, 1, 10, 0, 0));
    }

    #[test]
    fn stream_tag_used_when_format_tag_missing_or_broken() {
        let missing = report(&[], &[&[], &[("creation_time", "2022-01-02T03:04:05.000000Z")]]);
        assert_eq!(video_capture_time(&missing).expect("time"), at(2022, 1, 2, 3, 4, 5));

        let broken = report(
            &[("creation_time", "garbage")],
            &[&[("creation_time", "2022-01-02T03:04:05Z")]],
        );
        assert_eq!(video_capture_time(&broken).expect("time"), at(2022, 1, 2, 3, 4, 5));
    }

    #[test]
    fn quicktime_vendor_tag_strips_offset() {
        let positive = report(&[("com.apple.quicktime.creationdate", "2021-07-04T18:30:12+0200")], &[]);
        assert_eq!(video_capture_time(&positive).expect("time"), at(2021, 7, 4, 18, 30, 12));

        let negative = report(&[("com.apple.quicktime.creationdate", "2021-07-04T18:30:12-0700")], &[]);
        assert_eq!(video_capture_time(&negative).expect("time"), at(2021, 7, 4, 18, 30, 12));
    }

    #[test]
    fn exhausted_video_attempts_report_every_failure() {
        let untagged = report(&[("encoder", "Lavf")], &[&[("language", "und")]]);
        let failures = video_capture_time(&untagged).unwrap_err();
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0], ExtractError::MissingTag(_)));
    }

    #[test]
    fn probe_datetime_tolerates_short_and_multibyte_values() {
        assert!(parse_probe_datetime("2023-05").is_err());
        assert!(parse_probe_datetime("ünïcödé-välüé-thät-is-löng").is_err());
        assert_eq!(
            parse_probe_datetime("2023-05-01T10:00:00.123456Z").expect("time"),
            at(2023, 5, 1, 10, 0, 0)
        );
    }

    #[test]
    fn first_success_stops_at_first_ok() {
        let attempts = vec![
            Err(ExtractError::MissingTag("a".to_string())),
            Ok(at(2020, 1, 1, 0, 0, 0)),
            Ok(at(2021, 1, 1, 0, 0, 0)),
        ];
        assert_eq!(first_success(attempts).expect("ok"), at(2020, 1, 1, 0, 0, 0));
    }

    /// Minimal JPEG: SOI, an APP1 `Exif` segment holding `fields`, EOI.
    fn jpeg_with_exif(fields: &[exif::Field]) -> Vec<u8> {
        let mut writer = exif::experimental::Writer::new();
        for field in fields {
            writer.push_field(field);
        }
        let mut tiff = std::io::Cursor::new(Vec::new());
        writer.write(&mut tiff, false).expect("encode exif");
        let tiff = tiff.into_inner();

        let segment_len = u16::try_from(2 + 6 + tiff.len()).expect("segment fits");
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpeg.extend_from_slice(&segment_len.to_be_bytes());
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend_from_slice(&tiff);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn image_with_date_time_original_is_embedded() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("IMG_0012.JPG");
        let original = exif::Field {
            tag: Tag::DateTimeOriginal,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"2024:03:07 14:05:09".to_vec()]),
        };
        fs::write(&path, jpeg_with_exif(&[original])).expect("write jpeg");
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(
            image_capture_time(&path).expect("exif time"),
            at(2024, 3, 7, 14, 5, 9)
        );
        let extractor = MetadataExtractor::new(Box::new(CannedProber(None)));
        let ts = extractor.extract(&record(&path, MediaCategory::Image, modified));
        assert_eq!(ts, CaptureTimestamp::embedded(at(2024, 3, 7, 14, 5, 9)));
        assert_eq!(ts.provenance, Provenance::EmbeddedMetadata);
    }

    #[test]
    fn image_without_date_time_original_falls_back() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("IMG_0013.JPG");
        let make = exif::Field {
            tag: Tag::Make,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"Apple".to_vec()]),
        };
        fs::write(&path, jpeg_with_exif(&[make])).expect("write jpeg");

        assert!(matches!(
            image_capture_time(&path),
            Err(ExtractError::MissingTag(_))
        ));
    }

    #[test]
    fn corrupt_image_falls_back_to_mtime() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("IMG_0001.JPG");
        fs::write(&path, b"not really a jpeg").expect("write");
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let extractor = MetadataExtractor::new(Box::new(CannedProber(None)));
        let ts = extractor.extract(&record(&path, MediaCategory::Image, modified));
        assert_eq!(ts, CaptureTimestamp::from_mtime(modified));
        assert_eq!(ts.provenance, Provenance::FilesystemMtime);
    }

    #[test]
    fn missing_image_file_still_yields_mtime() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("gone.jpeg");
        let modified = UNIX_EPOCH + Duration::from_secs(1_600_000_000);

        let extractor = MetadataExtractor::new(Box::new(CannedProber(None)));
        let ts = extractor.extract(&record(&path, MediaCategory::Image, modified));
        assert_eq!(ts.provenance, Provenance::FilesystemMtime);
    }

    #[test]
    fn video_uses_probe_then_falls_back() {
        let path = Path::new("/media/clip.mov");
        let modified = UNIX_EPOCH + Duration::from_secs(1_650_000_000);

        let probed = MetadataExtractor::new(Box::new(CannedProber(Some(report(
            &[("creation_time", "2023-05-01T10:00:00Z")],
            &[],
        )))));
        let ts = probed.extract(&record(path, MediaCategory::Video, modified));
        assert_eq!(ts, CaptureTimestamp::embedded(at(2023, 5, 1, 10, 0, 0)));

        let unavailable = MetadataExtractor::new(Box::new(CannedProber(None)));
        let ts = unavailable.extract(&record(path, MediaCategory::Video, modified));
        assert_eq!(ts, CaptureTimestamp::from_mtime(modified));
    }

    #[test]
    fn other_files_always_use_mtime() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let extractor = MetadataExtractor::new(Box::new(CannedProber(Some(report(
            &[("creation_time", "2023-05-01T10:00:00Z")],
            &[],
        )))));
        let ts = extractor.extract(&record(Path::new("/media/notes.txt"), MediaCategory::Other, modified));
        assert_eq!(ts.provenance, Provenance::FilesystemMtime);
    }

    #[test]
    fn ffprobe_json_deserializes() {
        let raw = r#"{
            "streams": [{"index": 0, "codec_type": "video", "tags": {"creation_time": "2023-05-02T11:00:00.000000Z"}}],
            "format": {"filename": "clip.mov", "tags": {"creation_time": "2023-05-01T10:00:00.000000Z", "major_brand": "qt  "}}
        }"#;
        let parsed: ProbeReport = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.streams.len(), 1);
        assert_eq!(video_capture_time(&parsed).expect("time"), at(2023, 5, 1, 10, 0, 0));
    }

    #[test]
    fn missing_ffprobe_is_unavailable() {
        let prober = FfprobeProber {
            bin: None,
            timeout_secs: None,
        };
        assert!(matches!(
            prober.probe(Path::new("/media/clip.mov")),
            Err(ExtractError::ProbeUnavailable(_))
        ));
    }
}
