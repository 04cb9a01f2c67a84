//! Best-effort repair of markdown cut off mid-generation.
//!
//! Two things are fixed: a code fence left open at the end of the text gets
//! a closing fence, and a pipe table whose header never got a separator row
//! gets one. Anything else passes through untouched.

use std::panic::{self, AssertUnwindSafe};

/// Repair `text` for rendering. Falls back to the input unchanged if the
/// repair pass fails for any reason.
pub fn sanitize(text: &str) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| repair(text))) {
        Ok(repaired) => repaired,
        Err(_) => {
            tracing::debug!(len = text.len(), "markdown repair failed; keeping original text");
            text.to_string()
        }
    }
}

fn repair(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut open: Option<Fence> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(fence) = &open {
            if fence.is_closed_by(line) {
                open = None;
            }
            out.push(line.to_string());
            i += 1;
            continue;
        }

        if let Some(fence) = Fence::opening(line) {
            open = Some(fence);
            out.push(line.to_string());
            i += 1;
            continue;
        }

        if is_table_row(line) {
            let end = lines[i..]
                .iter()
                .position(|l| !is_table_row(l))
                .map_or(lines.len(), |n| i + n);
            let run = &lines[i..end];

            out.push(run[0].to_string());
            if !run.iter().any(|l| is_separator(l)) {
                out.push(separator_row(column_count(run[0])));
            }
            out.extend(run[1..].iter().map(|l| l.to_string()));
            i = end;
            continue;
        }

        out.push(line.to_string());
        i += 1;
    }

    let mut repaired = out.join("\n");
    if let Some(fence) = open {
        if !repaired.ends_with('\n') {
            repaired.push('\n');
        }
        repaired.push_str(&fence.closing());
    }
    repaired
}

#[derive(Debug, Clone, Copy)]
struct Fence {
    ch: char,
    len: usize,
}

impl Fence {
    fn opening(line: &str) -> Option<Self> {
        let body = strip_indent(line)?;
        let ch = body.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = body.chars().take_while(|c| *c == ch).count();
        if len < 3 {
            return None;
        }
        // A backtick fence's info string may not contain backticks;
        // otherwise this is inline code.
        let info = &body[len..];
        if ch == '`' && info.contains('`') {
            return None;
        }
        Some(Self { ch, len })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let Some(body) = strip_indent(line) else {
            return false;
        };
        let body = body.trim_end();
        let run = body.chars().take_while(|c| *c == self.ch).count();
        run >= self.len && run == body.chars().count()
    }

    fn closing(&self) -> String {
        std::iter::repeat(self.ch).take(self.len).collect()
    }
}

// Up to three spaces of indentation; four or more is an indented code block.
fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent <= 3).then(|| &line[indent..])
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator(line: &str) -> bool {
    let cells = cells(line);
    !cells.is_empty()
        && cells.iter().all(|cell| {
            let c = cell.trim();
            let c = c.strip_prefix(':').unwrap_or(c);
            let c = c.strip_suffix(':').unwrap_or(c);
            !c.is_empty() && c.chars().all(|ch| ch == '-')
        })
}

fn column_count(header: &str) -> usize {
    cells(header).len().max(1)
}

/// Cells of a `| a | b |` row, honouring `\|` escapes.
fn cells(line: &str) -> Vec<String> {
    let t = line.trim();
    let t = t.strip_prefix('|').unwrap_or(t);
    let t = match t.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => t,
    };

    let mut cells = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for ch in t.chars() {
        match ch {
            '|' if !escaped => cells.push(std::mem::take(&mut cur)),
            _ => cur.push(ch),
        }
        escaped = ch == '\\' && !escaped;
    }
    cells.push(cur);
    cells
}

fn separator_row(columns: usize) -> String {
    let mut row = String::from("|");
    for _ in 0..columns {
        row.push_str(" --- |");
    }
    row
}
