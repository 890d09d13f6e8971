use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use uuid::Uuid;
use wwwscope_client::SyncEntry;
use wwwscope_core::{ArchiveMode, ArchiveRequest, ArchiveStatus, DispatchReport, ServiceName, WarcFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    request_id: Uuid,
    url: &'a str,
    mode: ArchiveMode,
    results: &'a DispatchReport,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    service: &'static str,
    status: &'static str,
    message: &'a str,
    url: &'a str,
    guidance: &'a str,
}

/// Render a dispatch report for stdout.
pub fn render_report(
    request: &ArchiveRequest,
    report: &DispatchReport,
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let doc = JsonReport {
                request_id: request.id,
                url: &request.url,
                mode: request.mode,
                results: report,
            };
            Ok(serde_json::to_string_pretty(&doc)?)
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for (service, result) in report {
                writer.serialize(CsvRow {
                    service: service.as_str(),
                    status: result.status.as_str(),
                    message: &result.message,
                    url: result.url.as_deref().unwrap_or_default(),
                    guidance: result.guidance.as_deref().unwrap_or_default(),
                })?;
            }
            let bytes = writer.into_inner().context("Failed to flush CSV output")?;
            String::from_utf8(bytes).context("CSV output was not UTF-8")
        }
        OutputFormat::Text => {
            let mut out = format!("{} {}\n\n", capitalize(&request.mode.to_string()), request.url);
            for (service, result) in report {
                let marker = match result.status {
                    ArchiveStatus::Success => "OK",
                    ArchiveStatus::Pending => "..",
                    ArchiveStatus::Failure => "!!",
                };
                out.push_str(&format!("[{marker}] {service}: {}\n", result.message));
                if let Some(url) = &result.url {
                    out.push_str(&format!("     {url}\n"));
                }
                if result.status != ArchiveStatus::Success
                    && let Some(guidance) = &result.guidance
                {
                    out.push_str(&format!("     hint: {guidance}\n"));
                }
            }
            let ok = report.values().filter(|r| r.is_success()).count();
            out.push_str(&format!("\n{ok}/{} services succeeded\n", report.len()));
            Ok(out)
        }
    }
}

/// Table of every known service and what it can do.
pub fn render_services() -> String {
    let mut out = format!("{:<18} {:<16} {}\n", "SLUG", "NAME", "CAPABILITIES");
    for svc in ServiceName::ALL {
        let caps = match (svc.supports_submit(), svc.is_link_only()) {
            (true, _) => "archive, retrieve",
            (false, true) => "retrieve (link)",
            (false, false) => "retrieve",
        };
        out.push_str(&format!("{:<18} {:<16} {caps}\n", svc.as_str(), svc.display_name()));
    }
    out
}

pub fn render_warcs(files: &[WarcFile]) -> String {
    if files.is_empty() {
        return "No WARC files found\n".to_string();
    }
    let mut out = String::new();
    for file in files {
        out.push_str(&format!(
            "  {}  {:>8.2} MB  {}\n",
            file.modified.format("%Y-%m-%d %H:%M:%S UTC"),
            file.size_mb(),
            file.name
        ));
    }
    out.push_str(&format!("\nTotal: {} files\n", files.len()));
    out
}

/// Per-file lines for a `warcs sync` run.
pub fn render_sync(entries: &[SyncEntry]) -> String {
    if entries.is_empty() {
        return "No WARC files found\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        match &entry.outcome {
            Ok(receipt) => {
                out.push_str(&format!("[OK] {} -> {}\n", entry.file.name, receipt.identifier));
                if let Some(url) = &receipt.url {
                    out.push_str(&format!("     {url}\n"));
                }
            }
            Err(e) => {
                out.push_str(&format!("[!!] {}: {e}\n", entry.file.name));
                out.push_str(&format!("     hint: {}\n", e.guidance()));
            }
        }
    }
    let ok = entries.iter().filter(|e| e.is_uploaded()).count();
    out.push_str(&format!("\n{ok}/{} files uploaded\n", entries.len()));
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use wwwscope_core::{ArchiveError, ArchiveResult, UploadReceipt};

    use super::*;

    fn fixture() -> (ArchiveRequest, DispatchReport) {
        let request = ArchiveRequest::new(
            "example.com",
            ArchiveMode::Archive,
            [ServiceName::WaybackMachine, ServiceName::ArchiveToday],
        )
        .unwrap();
        let mut report = DispatchReport::new();
        report.insert(
            ServiceName::WaybackMachine,
            ArchiveResult::success("URL already archived").with_url("https://web.archive.org/web/1/x"),
        );
        report.insert(
            ServiceName::ArchiveToday,
            ArchiveResult::failure("failed, on all mirrors").with_guidance("Solve the CAPTCHA"),
        );
        (request, report)
    }

    #[test]
    fn test_text_output() {
        let (request, report) = fixture();
        let text = render_report(&request, &report, OutputFormat::Text).unwrap();
        assert!(text.starts_with("Archive https://example.com"));
        assert!(text.contains("[OK] Wayback Machine: URL already archived"));
        assert!(text.contains("[!!] Archive.today"));
        assert!(text.contains("hint: Solve the CAPTCHA"));
        assert!(text.contains("1/2 services succeeded"));
    }

    #[test]
    fn test_json_output_keys_by_slug() {
        let (request, report) = fixture();
        let json = render_report(&request, &report, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mode"], "archive");
        assert_eq!(value["results"]["wayback_machine"]["status"], "success");
        assert_eq!(value["results"]["archive_today"]["status"], "failure");
    }

    #[test]
    fn test_csv_output_quotes_commas() {
        let (request, report) = fixture();
        let csv = render_report(&request, &report, OutputFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("service,status,message,url,guidance"));
        assert_eq!(
            lines.next(),
            Some("wayback_machine,success,URL already archived,https://web.archive.org/web/1/x,")
        );
        assert_eq!(
            lines.next(),
            Some("archive_today,failure,\"failed, on all mirrors\",,Solve the CAPTCHA")
        );
    }

    #[test]
    fn test_services_table_lists_all() {
        let table = render_services();
        assert_eq!(table.lines().count(), ServiceName::ALL.len() + 1);
        assert!(table.contains("perma_cc"));
    }

    #[test]
    fn test_warc_listing() {
        assert!(render_warcs(&[]).contains("No WARC files"));
        let files = vec![WarcFile {
            name: "site.warc.gz".into(),
            path: PathBuf::from("warcs/site.warc.gz"),
            size_bytes: 3 * 1024 * 1024,
            modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }];
        let out = render_warcs(&files);
        assert!(out.contains("2024-05-01 12:00:00 UTC"));
        assert!(out.contains("3.00 MB"));
        assert!(out.contains("Total: 1 files"));
    }

    #[test]
    fn test_sync_listing() {
        assert!(render_sync(&[]).contains("No WARC files"));
        let file = |name: &str| WarcFile {
            name: name.into(),
            path: PathBuf::from("warcs").join(name),
            size_bytes: 1024,
            modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let entries = vec![
            SyncEntry {
                file: file("a.warc"),
                outcome: Ok(UploadReceipt {
                    identifier: "wwwscope_a_1".into(),
                    success: true,
                    url: Some("https://archive.org/details/wwwscope_a_1".into()),
                }),
            },
            SyncEntry {
                file: file("b.warc"),
                outcome: Err(ArchiveError::VerificationFailed("b.warc is not listed".into())),
            },
        ];
        let out = render_sync(&entries);
        assert!(out.contains("[OK] a.warc -> wwwscope_a_1"));
        assert!(out.contains("https://archive.org/details/wwwscope_a_1"));
        assert!(out.contains("[!!] b.warc"));
        assert!(out.contains("hint: "));
        assert!(out.contains("1/2 files uploaded"));
    }
}
