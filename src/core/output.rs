//! Compact output rendering helpers for hook and CLI surfaces.
//!
//! Block messages are read by the agent, so they stay plain text with a
//! fixed-width frame and bounded previews.

const RULE_WIDTH: usize = 70;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` entries joined by `sep`, with a "+N more" tail.
pub fn preview_list(items: &[String], max_items: usize, sep: &str) -> String {
    if items.is_empty() {
        return String::new();
    }
    let shown = items
        .iter()
        .take(max_items)
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(sep);
    if items.len() > max_items {
        format!("{} (+{} more)", shown, items.len() - max_items)
    } else {
        shown
    }
}

/// Frame a block message: headline, body lines, closing rule.
pub fn render_block(headline: &str, body: &[String]) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    out.push_str("BLOCKED: ");
    out.push_str(headline);
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&rule);
    out.push('\n');
    out
}
