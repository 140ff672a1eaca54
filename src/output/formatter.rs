//! Output formatters for run reports
//!
//! Table, JSON, CSV and one-line summary renderings of a `RunReport`, plus
//! the expansion plan, per-case evidence dumps and captured case logs.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::catalog::PlanEntry;
use crate::codec::hexdump;
use crate::models::{Classification, Evidence, LogEntry, RunReport, TestResult};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

const CSV_HEADER: [&str; 10] = [
    "case_id",
    "spec_id",
    "clause",
    "classification",
    "duration_ms",
    "timing_tier",
    "session_state",
    "expected",
    "observed",
    "explanation",
];

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn label(&self, classification: Classification) -> String {
        let plain = format!("{} {}", classification.symbol(), classification);
        if !self.colorize {
            return plain;
        }
        let color = match classification {
            Classification::Pass => "32",
            Classification::Fail | Classification::Error => "31",
            Classification::Informational => "36",
            Classification::Skip => "33",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    /// One result, as it streams in
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Table => format!(
                "{:<44} {:<8} {} [{:>6}ms] {}",
                result.case_id,
                result.clause,
                self.label(result.classification),
                result.duration_ms,
                result.explanation
            ),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                serde_json::to_string(result).unwrap_or_default()
            }
            OutputFormat::Csv => csv_rows(std::slice::from_ref(result), false).unwrap_or_default(),
            OutputFormat::Summary => format!(
                "{} {} ({}ms)",
                result.classification.symbol(),
                result.case_id,
                result.duration_ms
            ),
        }
    }

    pub fn format_report(&self, report: &RunReport) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.report_table(report)),
            OutputFormat::Json => {
                serde_json::to_string(report).context("Failed to serialize report")
            }
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(report).context("Failed to serialize report")
            }
            OutputFormat::Csv => csv_rows(&report.results, true),
            OutputFormat::Summary => Ok(self.report_brief(report)),
        }
    }

    fn report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();
        let rule = "═".repeat(78);

        output.push_str(&format!("\n{rule}\n"));
        output.push_str(&format!(
            " Run {} | {} | {} tier | {}\n",
            report.run_id, report.dut, report.tier, report.timing_tier
        ));
        output.push_str(&format!("{rule}\n"));

        for result in &report.results {
            output.push_str(&format!(" {}\n", self.format_result(result)));
        }

        output.push_str(&self.format_totals(report));
        output
    }

    /// Section table and totals, printed after streamed results
    pub fn format_totals(&self, report: &RunReport) -> String {
        let mut output = format!("{}\n", "═".repeat(78));
        output.push_str(&self.sections_table(report));
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Info: {} | Skip: {} | Error: {}\n",
            report.counts.total,
            report.counts.passed,
            report.counts.failed,
            report.counts.informational,
            report.counts.skipped,
            report.counts.errors
        ));
        if report.cancelled {
            output.push_str(&format!(" Stopped early: {} cases not run\n", report.not_run));
        }
        output.push_str(&format!(
            " Pass Rate: {:.1}% | Duration: {}ms\n",
            report.pass_rate(),
            report.total_duration_ms
        ));
        output
    }

    fn sections_table(&self, report: &RunReport) -> String {
        let mut output = String::new();
        output.push_str(" Section  Title                    Pass  Fail  Info  Skip  Error\n");
        output.push_str(" ───────  ───────────────────────  ────  ────  ────  ────  ─────\n");
        for section in &report.sections {
            let c = &section.counts;
            output.push_str(&format!(
                " {:<7}  {:<23}  {:>4}  {:>4}  {:>4}  {:>4}  {:>5}\n",
                section.section,
                section.title,
                c.passed,
                c.failed,
                c.informational,
                c.skipped,
                c.errors
            ));
        }
        output.push('\n');
        output
    }

    fn report_brief(&self, report: &RunReport) -> String {
        let mut line = format!(
            "{} ({} tier): {}/{} passed ({:.1}%), {} failed, {} informational, {} skipped, {} errors in {}ms",
            report.dut,
            report.tier,
            report.counts.passed,
            report.counts.total,
            report.pass_rate(),
            report.counts.failed,
            report.counts.informational,
            report.counts.skipped,
            report.counts.errors,
            report.total_duration_ms
        );
        if report.cancelled {
            line.push_str(&format!(" (stopped, {} not run)", report.not_run));
        }
        line
    }

    /// Expansion counts per spec
    pub fn format_plan(&self, entries: &[PlanEntry]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(entries).context("Failed to serialize plan"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(entries).context("Failed to serialize plan")
            }
            OutputFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(["spec_id", "clause", "title", "cases", "placeholders"])?;
                for e in entries {
                    writer.write_record([
                        e.spec_id.as_str(),
                        e.clause.as_str(),
                        e.title.as_str(),
                        e.cases.to_string().as_str(),
                        e.placeholders.to_string().as_str(),
                    ])?;
                }
                finish_csv(writer)
            }
            OutputFormat::Table | OutputFormat::Summary => {
                let total: usize = entries.iter().map(|e| e.cases).sum();
                let skipped: usize = entries.iter().map(|e| e.placeholders).sum();
                let mut output = String::new();
                if self.format == OutputFormat::Table {
                    for e in entries {
                        output.push_str(&format!(
                            "{:<18} {:<7} {:>6} {:>5}  {}\n",
                            e.spec_id, e.clause, e.cases, e.placeholders, e.title
                        ));
                    }
                }
                output.push_str(&format!(
                    "{} specs, {} cases ({} will skip)\n",
                    entries.len(),
                    total,
                    skipped
                ));
                Ok(output)
            }
        }
    }

    /// Frames sent and received, with hexdumps
    pub fn format_evidence(&self, evidence: &Evidence) -> String {
        let mut output = String::new();
        for record in &evidence.sent {
            output.push_str(&format!("  sent on port {}: {}\n", record.port, record.summary));
            output.push_str(&indent(&hexdump(&record.bytes, 16), 4));
        }
        for (port, records) in &evidence.received {
            for record in records {
                output.push_str(&format!(
                    "  received on port {} at {}ns: {}\n",
                    port, record.timestamp.0, record.summary
                ));
                output.push_str(&indent(&hexdump(&record.bytes, 16), 4));
            }
        }
        if let Some(latency) = evidence.latency {
            output.push_str(&format!("  latency: {latency:?}\n"));
        }
        for note in &evidence.notes {
            output.push_str(&format!("  note: {note}\n"));
        }
        output
    }

    /// Log lines captured while a case ran
    pub fn format_logs(&self, entries: &[LogEntry]) -> String {
        if entries.is_empty() {
            return String::new();
        }
        let mut output = String::from("  log:\n");
        for entry in entries {
            output.push_str(&format!("    {entry}\n"));
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines().map(|l| format!("{pad}{l}\n")).collect()
}

fn csv_rows(results: &[TestResult], header: bool) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if header {
        writer.write_record(CSV_HEADER)?;
    }
    for r in results {
        writer.write_record([
            r.case_id.as_str(),
            r.spec_id.as_str(),
            r.clause.as_str(),
            r.classification.to_string().as_str(),
            r.duration_ms.to_string().as_str(),
            r.timing_tier.letter().to_string().as_str(),
            r.session_state.name(),
            r.expected.as_str(),
            r.observed.as_str(),
            r.explanation.as_str(),
        ])?;
    }
    finish_csv(writer)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Write a report to a file without colors
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &RunReport,
    format: OutputFormat,
) -> Result<()> {
    let path = path.as_ref();
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PortPair, SamplingTier, TestCase};
    use crate::timing::TimingTier;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn case(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            spec_id: "SWITCH_VLAN_001".to_string(),
            clause: "5.3.1".parse().unwrap(),
            section: "5.3".to_string(),
            tier: SamplingTier::Minimal,
            seq: 0,
            bindings: Vec::new(),
            ports: Some(PortPair::new(0, 1)),
            scope: BTreeSet::from([0, 1]),
            placeholder: None,
        }
    }

    fn report() -> RunReport {
        RunReport::new(
            "reference-switch",
            SamplingTier::Minimal,
            TimingTier::TierA,
            vec![
                TestResult::pass(&case("SWITCH_VLAN_001_P0_P1_V1"), "delivered to {1}"),
                TestResult::fail(
                    &case("SWITCH_VLAN_001_P2_P0_V100"),
                    "expected ports {} but observed {1}",
                )
                .with_expectation("ports {}", "ports {1}"),
            ],
        )
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_table_report() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&report())
            .unwrap();
        assert!(output.contains("SWITCH_VLAN_001_P2_P0_V100"));
        assert!(output.contains("✗ FAIL"));
        assert!(output.contains("VLAN"));
        assert!(output.contains("Pass: 1 | Fail: 1"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_csv_rows() {
        let output = ResultFormatter::new(OutputFormat::Csv)
            .format_report(&report())
            .unwrap();
        let mut lines = output.lines();
        assert!(lines.next().unwrap().starts_with("case_id,spec_id,clause,classification"));
        let fail = output.lines().nth(2).unwrap();
        assert!(fail.contains("FAIL"));
        assert!(fail.ends_with(",expected ports {} but observed {1}"));
    }

    #[test]
    fn test_json_round_trips() {
        let output = ResultFormatter::new(OutputFormat::Json)
            .format_report(&report())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["counts"]["failed"], 1);
        assert_eq!(value["results"][1]["classification"], "fail");
    }

    #[test]
    fn test_case_logs() {
        let formatter = ResultFormatter::new(OutputFormat::Table);
        assert_eq!(formatter.format_logs(&[]), "");

        let entry = LogEntry {
            timestamp: "2026-03-01T10:15:30.250Z".parse().unwrap(),
            level: "DEBUG".to_string(),
            target: "l2_conformance::handlers".to_string(),
            message: "sent frame port=0".to_string(),
        };
        assert_eq!(
            formatter.format_logs(&[entry.clone()]),
            "  log:\n    10:15:30.250 DEBUG sent frame port=0\n"
        );

        let mut report = report();
        report.results[1].log_entries.push(entry);
        let output = ResultFormatter::new(OutputFormat::Json)
            .format_report(&report)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(value["results"][0].get("log_entries").is_none());
        assert_eq!(value["results"][1]["log_entries"][0]["level"], "DEBUG");
    }

    #[test]
    fn test_summary_line() {
        let output = ResultFormatter::new(OutputFormat::Summary)
            .format_report(&report())
            .unwrap();
        assert!(output.starts_with("reference-switch (minimal tier): 1/2 passed"));
    }

    #[test]
    fn test_plan_table() {
        let entries = vec![PlanEntry {
            spec_id: "SWITCH_VLAN_010".to_string(),
            clause: "5.3.10".to_string(),
            title: "Double tagging".to_string(),
            cases: 4,
            placeholders: 4,
        }];
        let output = ResultFormatter::new(OutputFormat::Table)
            .format_plan(&entries)
            .unwrap();
        assert!(output.contains("1 specs, 4 cases (4 will skip)"));
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report_to_file(&path, &report(), OutputFormat::JsonPretty).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"dut\": \"reference-switch\""));
    }
}
