//! HTML sanitization for forum message bodies
//!
//! Messages arrive as HTML fragments written by a rich-text editor and
//! stored XML-escaped inside the forum manifest. Parsing goes through
//! html5ever (via `scraper`), which best-effort reconstructs a DOM from
//! arbitrarily malformed input, so sanitization never fails.
//!
//! `script`/`style`/`noscript` subtrees are dropped with their content and
//! every text node goes through [`crate::text::normalize`]. What happens
//! to `img` tags and attributes depends on the sink, see [`SanitizeMode`].

use crate::text;
use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

/// Attribute/image policy for [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeMode {
    /// Database/CSV records: `img` subtrees are removed (attachments are
    /// tracked separately) and every attribute is stripped.
    Record,
    /// Static HTML export: `img` keeps its `src` and `a` keeps its `href`
    /// so the renderer can rewrite `@@PLUGINFILE@@` tokens; everything
    /// else (event handlers, styles, tracking attributes) is stripped.
    Display,
}

/// Sanitize an HTML fragment, returning a fragment safe to store/display.
pub fn sanitize(html: &str, mode: SanitizeMode) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    for child in fragment.tree.root().children() {
        serialize(child, mode, &mut out);
    }
    out
}

/// Resolve HTML entities left over from double escaping (`&amp;lt;` and
/// friends). Unknown entities leave the input untouched; the downstream
/// parser copes with them anyway.
pub fn unescape_entities(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => raw.to_string(),
    }
}

const REMOVED_TAGS: &[&str] = &["script", "style", "noscript"];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn serialize(node: NodeRef<'_, Node>, mode: SanitizeMode, out: &mut String) {
    match node.value() {
        Node::Text(t) => {
            let normalized = text::normalize(&t);
            if !normalized.is_empty() {
                out.push_str(&escape_text(&normalized));
            }
        },
        Node::Element(el) => {
            let name = el.name();

            if REMOVED_TAGS.contains(&name) {
                return;
            }
            if mode == SanitizeMode::Record && name == "img" {
                return;
            }
            // html5ever wraps fragments in a synthetic <html> element
            if name == "html" {
                for child in node.children() {
                    serialize(child, mode, out);
                }
                return;
            }

            out.push('<');
            out.push_str(name);
            if mode == SanitizeMode::Display {
                let kept = match name {
                    "img" => el.attr("src").map(|v| ("src", v)),
                    "a" => el.attr("href").map(|v| ("href", v)),
                    _ => None,
                };
                if let Some((attr, value)) = kept {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
            }
            out.push('>');

            if VOID_TAGS.contains(&name) {
                return;
            }
            for child in node.children() {
                serialize(child, mode, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        },
        // Comments, doctypes and processing instructions are dropped
        _ => {
            for child in node.children() {
                serialize(child, mode, out);
            }
        },
    }
}

/// Escape a text node for re-serialization.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
