use super::{exit_codes, open_existing};
use crate::cli::args::{ExportArgs, ExportFormat};
use anyhow::Context;
use evalkit_core::storage::rows::OutputRow;
use serde_json::Value;
use std::io::Write;

const CSV_COLUMNS: [&str; 14] = [
    "output_id",
    "case_id",
    "scheme",
    "expected",
    "raw_text",
    "score",
    "label",
    "reason",
    "latency_ms",
    "tokens_in",
    "tokens_out",
    "tool_meta_json",
    "details_json",
    "metadata_json",
];

pub fn cmd_export(args: ExportArgs) -> anyhow::Result<i32> {
    let Some(store) = open_existing(&args.db)? else {
        return Ok(exit_codes::CONFIG_ERROR);
    };

    let run_id = match args.run {
        Some(id) => id,
        None => match store.latest_run_id(None)? {
            Some(id) => id,
            None => {
                eprintln!("No runs found in database.");
                return Ok(exit_codes::TEST_FAILED);
            }
        },
    };

    let rows = store.outputs_for_run(&run_id)?;
    if rows.is_empty() {
        eprintln!("No results found for run {}.", run_id);
        return Ok(exit_codes::TEST_FAILED);
    }

    match &args.out {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_rows(&rows, args.format, file)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Exported {} rows to {}", rows.len(), path.display());
        }
        None => write_rows(&rows, args.format, std::io::stdout().lock())?,
    }
    Ok(exit_codes::OK)
}

fn write_rows<W: Write>(rows: &[OutputRow], format: ExportFormat, mut out: W) -> anyhow::Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, rows)?;
            writeln!(out)?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new().from_writer(out);
            writer.write_record(CSV_COLUMNS)?;
            for row in rows {
                writer.write_record(csv_record(row))?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Missing values are empty cells; JSON columns hold compact JSON.
fn csv_record(row: &OutputRow) -> [String; 14] {
    fn opt<T: ToString>(v: &Option<T>) -> String {
        v.as_ref().map(ToString::to_string).unwrap_or_default()
    }
    fn json(v: &Option<Value>) -> String {
        v.as_ref().map(Value::to_string).unwrap_or_default()
    }

    [
        row.output_id.clone(),
        row.case_id.clone(),
        opt(&row.scheme),
        opt(&row.expected),
        row.raw_text.clone(),
        opt(&row.score),
        opt(&row.label),
        opt(&row.reason),
        opt(&row.latency_ms),
        opt(&row.tokens_in),
        opt(&row.tokens_out),
        json(&row.tool_meta),
        json(&row.details),
        if row.metadata.is_empty() {
            String::new()
        } else {
            Value::Object(row.metadata.clone()).to_string()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> OutputRow {
        OutputRow {
            output_id: "o1".into(),
            case_id: "c1".into(),
            raw_text: "line one, with comma\nline \"two\"".into(),
            latency_ms: Some(12.5),
            tokens_in: Some(3),
            tokens_out: None,
            tool_meta: Some(json!({ "tool_calls": 2 })),
            score: Some(1.0),
            label: Some("PASS".into()),
            reason: None,
            details: None,
            expected: Some("ping".into()),
            scheme: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn csv_quotes_free_text_and_leaves_missing_cells_empty() {
        let mut buf = Vec::new();
        write_rows(&[row()], ExportFormat::Csv, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_COLUMNS.to_vec());

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(&rec[4], "line one, with comma\nline \"two\"");
        assert_eq!(&rec[5], "1");
        assert_eq!(&rec[6], "PASS");
        assert_eq!(&rec[10], "");
        assert_eq!(&rec[11], r#"{"tool_calls":2}"#);
        assert_eq!(&rec[13], "");
    }

    #[test]
    fn json_is_an_array_of_rows() {
        let mut buf = Vec::new();
        write_rows(&[row()], ExportFormat::Json, &mut buf).unwrap();
        let parsed: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed[0]["label"], "PASS");
        assert_eq!(parsed[0]["tool_meta"]["tool_calls"], 2);
    }
}
