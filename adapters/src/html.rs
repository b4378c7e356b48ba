//! HTML body shaping for wiki and ticket content.
//!
//! Upstream services return rendered or storage-format HTML; the knowledge
//! base wants plain text or Markdown. Both converters walk the parsed tree,
//! skipping script/style subtrees and separating block elements with
//! newlines.

use ego_tree::NodeRef;
use scraper::{Html, Node};

pub(crate) fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    walk_text(document.tree.root(), &mut out);
    tidy(&out)
}

pub(crate) fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    walk_markdown(document.tree.root(), &mut out);
    tidy(&out)
}

fn walk_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if matches!(name, "script" | "style") {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                }
                walk_text(child, out);
                if is_block(name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn walk_markdown(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                match name {
                    "script" | "style" => {}
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = name[1..].parse::<usize>().unwrap_or(1);
                        out.push('\n');
                        out.push_str(&"#".repeat(level));
                        out.push(' ');
                        walk_markdown(child, out);
                        out.push('\n');
                    }
                    "li" => {
                        out.push_str("- ");
                        walk_markdown(child, out);
                        out.push('\n');
                    }
                    "br" => out.push('\n'),
                    "strong" | "b" => {
                        out.push_str("**");
                        walk_markdown(child, out);
                        out.push_str("**");
                    }
                    "em" | "i" => {
                        out.push('*');
                        walk_markdown(child, out);
                        out.push('*');
                    }
                    "code" => {
                        out.push('`');
                        walk_markdown(child, out);
                        out.push('`');
                    }
                    "pre" => {
                        out.push_str("\n```\n");
                        collect_text(child, out);
                        out.push_str("\n```\n");
                    }
                    "a" => {
                        let mut text = String::new();
                        collect_text(child, &mut text);
                        let text = text.trim();
                        match element.attr("href") {
                            Some(href) if !text.is_empty() => {
                                out.push_str(&format!("[{text}]({href})"));
                            }
                            _ => out.push_str(text),
                        }
                    }
                    _ => {
                        walk_markdown(child, out);
                        if is_block(name) {
                            out.push('\n');
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => collect_text(child, out),
            _ => {}
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "table"
            | "tr"
            | "ul"
            | "ol"
            | "li"
            | "blockquote"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "pre"
    )
}

/// Trim trailing space per line and collapse runs of blank lines.
fn tidy(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in raw.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            lines.push("");
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extraction_separates_blocks() {
        let html = "<h1>Title</h1><p>First paragraph.</p><p>Second.</p>";
        let text = html_to_text(html);
        assert_eq!(text, "Title\nFirst paragraph.\nSecond.");
    }

    #[test]
    fn text_extraction_drops_scripts() {
        let html = "<p>Visible</p><script>alert('no')</script>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn markdown_renders_headings_lists_and_links() {
        let html = "<h2>Setup</h2><ul><li>step one</li><li>step two</li></ul>\
                    <p>See <a href=\"https://example.com\">the docs</a>.</p>";
        let md = html_to_markdown(html);
        assert!(md.contains("## Setup"));
        assert!(md.contains("- step one"));
        assert!(md.contains("[the docs](https://example.com)"));
    }

    #[test]
    fn markdown_renders_emphasis_and_code() {
        let html = "<p><strong>bold</strong> and <em>soft</em> and <code>x = 1</code></p>";
        let md = html_to_markdown(html);
        assert!(md.contains("**bold**"));
        assert!(md.contains("*soft*"));
        assert!(md.contains("`x = 1`"));
    }

    #[test]
    fn preformatted_blocks_become_fences() {
        let html = "<pre>fn main() {}</pre>";
        let md = html_to_markdown(html);
        assert!(md.contains("```\nfn main() {}\n```"));
    }
}
