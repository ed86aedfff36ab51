// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::borrow::Cow;

use comfy_table::{CellAlignment, Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use super::QueryResult;

/// Maximum width for JSON text columns
const MAX_JSON_COLUMN_WIDTH: usize = 60;

/// Columns holding JSON objects, width-limited in table mode
const WIDE_COLUMNS: &[&str] = &["labels", "container", "taint"];

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

/// How a column is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnStyle {
    Plain,
    /// JSON text, truncated
    Wide,
    /// Every non-empty value is a number, right-aligned
    Numeric,
}

fn column_style(result: &QueryResult, idx: usize) -> ColumnStyle {
    if WIDE_COLUMNS.contains(&result.columns[idx].as_str()) {
        return ColumnStyle::Wide;
    }
    let mut values = result
        .rows
        .iter()
        .filter_map(|row| row.get(idx).and_then(Option::as_deref))
        .filter(|v| !v.is_empty())
        .peekable();
    if values.peek().is_some() && values.all(|v| v.parse::<f64>().is_ok()) {
        ColumnStyle::Numeric
    } else {
        ColumnStyle::Plain
    }
}

fn row_count_footer(count: usize) -> String {
    if count == 1 {
        "(1 row)".to_string()
    } else {
        format!("({} rows)", count)
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(result: &QueryResult, no_headers: bool) -> String {
        if result.rows.is_empty() {
            return row_count_footer(0);
        }

        let mut table = Table::new();
        // ASCII_BORDERS_ONLY_CONDENSED is close to psql style
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        let styles: Vec<ColumnStyle> = (0..result.columns.len())
            .map(|idx| column_style(result, idx))
            .collect();

        if !no_headers {
            table.set_header(&result.columns);
        }

        for row in &result.rows {
            let cells: Vec<Cow<'_, str>> = row
                .iter()
                .zip(&styles)
                .map(|(val, style)| {
                    let val = val.as_deref().unwrap_or("");
                    match style {
                        ColumnStyle::Wide => truncate_value(val, MAX_JSON_COLUMN_WIDTH),
                        _ => Cow::Borrowed(val),
                    }
                })
                .collect();
            table.add_row(cells);
        }

        for (idx, style) in styles.iter().enumerate() {
            if *style == ColumnStyle::Numeric
                && let Some(column) = table.column_mut(idx)
            {
                column.set_cell_alignment(CellAlignment::Right);
            }
        }

        format!("{}\n{}", table, row_count_footer(result.rows.len()))
    }
}
