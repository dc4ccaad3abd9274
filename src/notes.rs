//! Release-notes formatting: a fixed-order set of structural substitution
//! rules turning lightweight markup into structural markup. Inline spans are
//! rewritten first, then headings and bullet items, then contiguous item runs
//! are wrapped in a list container, then paragraph wrapping, and finally a
//! cleanup pass strips paragraph wrappers that ended up around a block
//! element. Output is deterministic for a given input.

pub fn format_release_notes(notes: &str) -> String {
    let lines: Vec<String> = notes.lines().map(transform_line).collect();
    let lines = wrap_list_runs(lines);
    assemble_blocks(&lines)
}

fn transform_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("### ") {
        return format!("<h3>{}</h3>", inline_spans(rest));
    }
    if let Some(rest) = line.strip_prefix("## ") {
        return format!("<h2>{}</h2>", inline_spans(rest));
    }
    if let Some(rest) = line.strip_prefix("# ") {
        return format!("<h1>{}</h1>", inline_spans(rest));
    }
    if let Some(rest) = bullet_text(line) {
        return format!("<li>{}</li>", inline_spans(rest));
    }
    inline_spans(line)
}

fn bullet_text(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('-')?;
    if rest.chars().next().is_some_and(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn inline_spans(line: &str) -> String {
    // Bold before italic so "**" is never consumed as two "*" spans.
    let line = replace_delimited(line, "**", "<strong>", "</strong>");
    let line = replace_delimited(&line, "*", "<em>", "</em>");
    let line = replace_delimited(&line, "`", "<code>", "</code>");
    replace_links(&line)
}

/// Rewrites each non-greedy `delim…delim` pair; an unpaired delimiter is
/// left as literal text.
fn replace_delimited(text: &str, delim: &str, open_tag: &str, close_tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(delim) {
        let after = &rest[start + delim.len()..];
        let Some(end) = after.find(delim) else { break };
        out.push_str(&rest[..start]);
        out.push_str(open_tag);
        out.push_str(&after[..end]);
        out.push_str(close_tag);
        rest = &after[end + delim.len()..];
    }
    out.push_str(rest);
    out
}

fn replace_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('[') {
        let candidate = &rest[start..];
        if let Some((label, url, consumed)) = parse_link(candidate) {
            out.push_str(&rest[..start]);
            out.push_str("<a href=\"");
            out.push_str(url);
            out.push_str("\">");
            out.push_str(label);
            out.push_str("</a>");
            rest = &candidate[consumed..];
        } else {
            out.push_str(&rest[..=start]);
            rest = &rest[start + 1..];
        }
    }
    out.push_str(rest);
    out
}

fn parse_link(candidate: &str) -> Option<(&str, &str, usize)> {
    let close = candidate.find(']')?;
    let label = &candidate[1..close];
    if label.is_empty() || !candidate[close..].starts_with("](") {
        return None;
    }
    let url_start = close + 2;
    let url_len = candidate[url_start..].find(')')?;
    if url_len == 0 {
        return None;
    }
    let url = &candidate[url_start..url_start + url_len];
    Some((label, url, url_start + url_len + 1))
}

/// Collapses every contiguous run of `<li>` lines into one `<ul>` line.
fn wrap_list_runs(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut run = String::new();
    for line in lines {
        if line.starts_with("<li>") {
            run.push_str(&line);
        } else {
            if !run.is_empty() {
                out.push(format!("<ul>{}</ul>", std::mem::take(&mut run)));
            }
            out.push(line);
        }
    }
    if !run.is_empty() {
        out.push(format!("<ul>{run}</ul>"));
    }
    out
}

/// Paragraph wrapping over blank-line-separated runs, then the cleanup pass:
/// a paragraph whose entire content is a single block element loses its
/// wrapper again.
fn assemble_blocks(lines: &[String]) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            flush_paragraph(&mut blocks, &mut paragraph);
        } else if is_block_element(line) {
            flush_paragraph(&mut blocks, &mut paragraph);
            blocks.push(format!("<p>{line}</p>"));
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut blocks, &mut paragraph);
    blocks
        .iter()
        .map(|block| strip_block_wrapper(block))
        .collect::<Vec<_>>()
        .join("\n")
}

fn flush_paragraph(blocks: &mut Vec<String>, paragraph: &mut Vec<&str>) {
    if !paragraph.is_empty() {
        blocks.push(format!("<p>{}</p>", paragraph.join("\n")));
        paragraph.clear();
    }
}

fn is_block_element(line: &str) -> bool {
    ["<h1>", "<h2>", "<h3>", "<ul>"]
        .iter()
        .any(|tag| line.starts_with(tag))
}

fn strip_block_wrapper(block: &str) -> String {
    if let Some(inner) = block
        .strip_prefix("<p>")
        .and_then(|rest| rest.strip_suffix("</p>"))
    {
        let exact_block = [
            ("<h1>", "</h1>"),
            ("<h2>", "</h2>"),
            ("<h3>", "</h3>"),
            ("<ul>", "</ul>"),
        ]
        .iter()
        .any(|(open, close)| inner.starts_with(open) && inner.ends_with(close));
        if exact_block {
            return inner.to_string();
        }
    }
    block.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_and_list_without_stray_paragraphs() {
        let output = format_release_notes("## Title\n- item one\n- item two");
        assert_eq!(
            output,
            "<h2>Title</h2>\n<ul><li>item one</li><li>item two</li></ul>"
        );
    }

    #[test]
    fn test_heading_levels() {
        assert_eq!(format_release_notes("# A"), "<h1>A</h1>");
        assert_eq!(format_release_notes("## B"), "<h2>B</h2>");
        assert_eq!(format_release_notes("### C"), "<h3>C</h3>");
    }

    #[test]
    fn test_inline_spans() {
        assert_eq!(
            format_release_notes("fix **bold** and *em* and `code`"),
            "<p>fix <strong>bold</strong> and <em>em</em> and <code>code</code></p>"
        );
    }

    #[test]
    fn test_links() {
        assert_eq!(
            format_release_notes("see [changelog](https://example.com/log) now"),
            "<p>see <a href=\"https://example.com/log\">changelog</a> now</p>"
        );
        // A bare bracket that is not a link stays literal.
        assert_eq!(format_release_notes("a [note] only"), "<p>a [note] only</p>");
    }

    #[test]
    fn test_unpaired_markers_stay_literal() {
        assert_eq!(format_release_notes("2 * 3 = 6"), "<p>2 * 3 = 6</p>");
    }

    #[test]
    fn test_blank_line_splits_paragraphs() {
        assert_eq!(
            format_release_notes("first block\n\nsecond block"),
            "<p>first block</p>\n<p>second block</p>"
        );
    }

    #[test]
    fn test_adjacent_lines_share_a_paragraph() {
        assert_eq!(
            format_release_notes("line one\nline two"),
            "<p>line one\nline two</p>"
        );
    }

    #[test]
    fn test_separated_item_runs_get_separate_lists() {
        let output = format_release_notes("- a\n\ntext\n\n- b\n- c");
        assert_eq!(
            output,
            "<ul><li>a</li></ul>\n<p>text</p>\n<ul><li>b</li><li>c</li></ul>"
        );
    }

    #[test]
    fn test_dash_without_space_is_not_a_bullet() {
        assert_eq!(format_release_notes("-not a bullet"), "<p>-not a bullet</p>");
    }

    #[test]
    fn test_output_is_deterministic() {
        let input = "## v1.2\n- **fast** `sync`\n\nsee [docs](https://example.com)";
        assert_eq!(format_release_notes(input), format_release_notes(input));
    }
}
