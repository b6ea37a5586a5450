use drydock_core::checks::CheckReport;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", format_table(headers, &rows));
}

/// Left-aligned columns sized to their widest cell. Rows shorter than the
/// header are padded; extra cells are kept unaligned at the end.
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(headers[col].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = table_line(&widths, headers.iter().copied());
    out.push_str(&table_line(&widths, rule.iter().map(String::as_str)));
    for row in rows {
        out.push_str(&table_line(&widths, row.iter().map(String::as_str)));
    }
    out
}

fn table_line<'a>(widths: &[usize], cells: impl Iterator<Item = &'a str>) -> String {
    let cells: Vec<String> = cells
        .enumerate()
        .map(|(col, cell)| match widths.get(col) {
            Some(&w) => format!("{cell:<w$}"),
            None => cell.to_string(),
        })
        .collect();
    format!("{}\n", cells.join("  ").trim_end())
}

/// `[error]`/`[warning]` prefixed lines, the way validation output reads.
pub fn print_findings(prefix: &str, findings: &[String]) {
    for finding in findings {
        println!("[{prefix}] {finding}");
    }
}

/// A check's findings under its name, errors first.
pub fn print_report(report: &CheckReport) {
    println!("\n{}:", report.check);
    print_findings("error", &report.errors);
    print_findings("warning", &report.warnings);
    print_findings("ok", &report.messages);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_columns_fit_the_widest_cell() {
        let rows = vec![
            vec!["name".to_string(), "api".to_string()],
            vec!["detailed_monitoring".to_string(), "false".to_string()],
        ];
        let text = format_table(&["FACT", "VALUE"], &rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "FACT                 VALUE");
        assert_eq!(lines[1], "-------------------  -----");
        assert_eq!(lines[2], "name                 api");
        assert_eq!(lines[3], "detailed_monitoring  false");
    }

    #[test]
    fn short_rows_leave_no_trailing_space() {
        let rows = vec![vec!["x".to_string()]];
        let text = format_table(&["A", "B"], &rows);
        assert_eq!(text.lines().nth(2), Some("x"));
    }
}
