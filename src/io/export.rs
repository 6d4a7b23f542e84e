//! CSV export for run results.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::fleet::ModuleTrace;
use crate::ledger::LedgerEntry;
use crate::site::PerformanceRow;

/// Column header for the per-month site performance export.
const PERFORMANCE_HEADER: &str = "month,fleet_month,ptmo,peff,ctmo,ceff,wtmo,weff,\
                                  ceiling_loss,fails_tmo,fails_efficiency";

/// Column header for the transaction ledger export.
const LEDGER_HEADER: &str = "month,serial,model,mark,power,efficiency,action,\
                             direction,site,server,enclosure,cost";

/// Column header for the per-module trace export.
const TRACE_HEADER: &str = "serial,month,power,efficiency";

/// Exports the target site's performance table to a CSV file.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_performance_csv(rows: &[PerformanceRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_performance_csv(rows, io::BufWriter::new(file))
}

/// Writes the performance table as CSV to any writer.
///
/// Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_performance_csv(rows: &[PerformanceRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(PERFORMANCE_HEADER.split(',').map(str::trim))?;
    for r in rows {
        wtr.write_record(&[
            r.month.to_string(),
            r.fleet_month.to_string(),
            format!("{:.6}", r.ptmo),
            format!("{:.6}", r.peff),
            format!("{:.6}", r.ctmo),
            format!("{:.6}", r.ceff),
            format!("{:.6}", r.wtmo),
            format!("{:.6}", r.weff),
            format!("{:.4}", r.ceiling_loss),
            r.fails_tmo.to_string(),
            r.fails_efficiency.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports the shop transaction ledger to a CSV file.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_ledger_csv(entries: &[LedgerEntry], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_ledger_csv(entries, io::BufWriter::new(file))
}

/// Writes the ledger as CSV to any writer. Absent slot columns are left
/// empty, matching the ledger's unslotted entries.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_ledger_csv(entries: &[LedgerEntry], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(LEDGER_HEADER.split(',').map(str::trim))?;
    for e in entries {
        wtr.write_record(&[
            e.month.to_string(),
            e.serial.to_string(),
            e.model.clone(),
            e.mark.clone(),
            format!("{:.4}", e.power),
            format!("{:.6}", e.efficiency),
            e.action.as_str().to_string(),
            e.direction.as_str().to_string(),
            e.site.map(|v| v.to_string()).unwrap_or_default(),
            e.server.map(|v| v.to_string()).unwrap_or_default(),
            e.enclosure.map(|v| v.to_string()).unwrap_or_default(),
            format!("{:.2}", e.cost),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports the target site's per-module traces to a CSV file.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_trace_csv(traces: &HashMap<u64, ModuleTrace>, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_trace_csv(traces, io::BufWriter::new(file))
}

/// Writes the per-module traces as CSV, ordered by serial then month so the
/// output is deterministic regardless of map iteration order.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_trace_csv(traces: &HashMap<u64, ModuleTrace>, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(TRACE_HEADER.split(','))?;
    let mut serials: Vec<u64> = traces.keys().copied().collect();
    serials.sort_unstable();
    for serial in serials {
        for (month, power, efficiency) in &traces[&serial] {
            wtr.write_record(&[
                serial.to_string(),
                month.to_string(),
                format!("{power:.4}"),
                format!("{efficiency:.6}"),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Action, Direction, SlotRef};

    fn make_row(m: usize) -> PerformanceRow {
        PerformanceRow {
            month: m,
            fleet_month: m + 2,
            ptmo: 0.98,
            peff: 0.52,
            ctmo: 0.97,
            ceff: 0.51,
            wtmo: 0.96,
            weff: 0.5,
            ceiling_loss: 1.5,
            fails_tmo: false,
            fails_efficiency: true,
        }
    }

    #[test]
    fn performance_header_and_row_count() {
        let rows: Vec<PerformanceRow> = (0..12).map(make_row).collect();
        let mut buf = Vec::new();
        write_performance_csv(&rows, &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let lines: Vec<&str> = output.as_deref().unwrap_or("").lines().collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(
            lines.first().copied().unwrap_or(""),
            "month,fleet_month,ptmo,peff,ctmo,ceff,wtmo,weff,\
             ceiling_loss,fails_tmo,fails_efficiency"
        );
    }

    #[test]
    fn ledger_unslotted_entries_have_empty_slot_columns() {
        let entries = vec![
            LedgerEntry::at_slot(
                3,
                7,
                "M100",
                "A",
                95.0,
                0.52,
                Action::Deployed,
                Direction::To,
                SlotRef { site: 0, server: 1, enclosure: 2 },
                250.0,
            ),
            LedgerEntry::unslotted(5, 7, "M100", "A", 0.0, 0.0, Action::Junked, 0.0),
        ];
        let mut buf = Vec::new();
        write_ledger_csv(&entries, &mut buf).ok();
        let output = String::from_utf8(buf).unwrap_or_default();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("deployed,to,0,1,2"));
        assert!(lines[2].contains("junked,,,,"));
    }

    #[test]
    fn trace_output_is_ordered_and_deterministic() {
        let mut traces: HashMap<u64, ModuleTrace> = HashMap::new();
        traces.insert(9, vec![(0, 90.0, 0.5), (1, 89.0, 0.5)]);
        traces.insert(2, vec![(0, 100.0, 0.55)]);

        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        write_trace_csv(&traces, &mut buf1).ok();
        write_trace_csv(&traces, &mut buf2).ok();
        assert_eq!(buf1, buf2);

        let output = String::from_utf8(buf1).unwrap_or_default();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("2,0,"));
        assert!(lines[2].starts_with("9,0,"));
    }

    #[test]
    fn performance_round_trip_parseable() {
        let rows: Vec<PerformanceRow> = (0..3).map(make_row).collect();
        let mut buf = Vec::new();
        write_performance_csv(&rows, &mut buf).ok();

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let headers = rdr.headers().cloned().ok();
        assert_eq!(headers.as_ref().map(csv::StringRecord::len), Some(11));

        let mut row_count = 0;
        for record in rdr.records() {
            let rec = record.ok();
            assert!(rec.is_some(), "every row should parse");
            let rec = rec.as_ref();
            for i in 2..9 {
                let val: Result<f64, _> = rec.unwrap()[i].parse();
                assert!(val.is_ok(), "column {i} should parse as f64");
            }
            row_count += 1;
        }
        assert_eq!(row_count, 3);
    }
}
