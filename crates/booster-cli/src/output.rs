use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_yaml<T: Serialize>(value: &T) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// First column left-aligned, the rest right-aligned (they are numbers).
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(String::len)
                .fold(headers[col].len(), usize::max)
        })
        .collect();

    let mut out = render_line(headers.iter().copied(), &widths);
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&render_line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn render_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let rendered: Vec<String> = cells
        .zip(widths)
        .enumerate()
        .map(|(col, (cell, &w))| {
            if col == 0 {
                format!("{cell:<w$}")
            } else {
                format!("{cell:>w$}")
            }
        })
        .collect();
    format!("{}\n", rendered.join("  ").trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_align_right() {
        let rows = vec![
            vec!["7".to_string(), "1.50".to_string()],
            vec!["123456".to_string(), "10.25".to_string()],
        ];
        let table = render_table(&["SKILL", "POWER"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "SKILL   POWER");
        assert_eq!(lines[1], "------  -----");
        assert_eq!(lines[2], "7        1.50");
        assert_eq!(lines[3], "123456  10.25");
    }

    #[test]
    fn empty_table_has_header_only() {
        let table = render_table(&["A", "B"], &[]);
        assert_eq!(table.lines().count(), 2);
    }
}
