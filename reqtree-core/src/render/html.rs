//! Self-contained HTML snapshot of the requirement tree

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::references::Segment;

use super::{anchor_for, LinkPair, RenderedDocument, RenderedNode};

/// Color scheme of the exported document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("theme must be 'light' or 'dark', got '{}'", other)),
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

struct Palette {
    background: &'static str,
    panel: &'static str,
    text: &'static str,
    muted: &'static str,
    preview: &'static str,
}

impl Theme {
    fn palette(self) -> Palette {
        match self {
            Theme::Light => Palette {
                background: "#f6f7fb",
                panel: "#ffffff",
                text: "#1f2430",
                muted: "#6b7280",
                preview: "#f6f7fb",
            },
            Theme::Dark => Palette {
                background: "#141821",
                panel: "#1f2430",
                text: "#e9edf5",
                muted: "#a0a7b4",
                preview: "#171c25",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticOptions {
    /// Version label printed in the snapshot header
    pub version: String,
    pub theme: Theme,
    pub generated_at: DateTime<Utc>,
}

impl StaticOptions {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            theme: Theme::default(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }
}

/// A rendered HTML snapshot plus the links it contains
#[derive(Debug, Clone)]
pub struct StaticDocument {
    html: String,
    links: BTreeSet<LinkPair>,
}

impl StaticDocument {
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }

    /// Cross-reference links written into the body (parent links excluded)
    pub fn link_pairs(&self) -> &BTreeSet<LinkPair> {
        &self.links
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.html)?;
        Ok(())
    }
}

/// Escapes `&`, `<`, `>` and `"` in user text
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn stylesheet(theme: Theme) -> String {
    let p = theme.palette();
    format!(
        r#"
    body {{ font-family: Arial, sans-serif; margin: 20px; background: {bg}; color: {text}; }}
    .snapshot {{ font-weight: 700; margin-bottom: 16px; }}
    .controls {{ margin-bottom: 12px; display: flex; gap: 8px; }}
    .controls button {{ padding: 6px 10px; border-radius: 6px; border: 1px solid #cbd2e1; background: #fff; cursor: pointer; }}
    .controls button:active {{ background: #e4ecf7; }}
    .node {{ background: {panel}; border-radius: 8px; padding: 12px; margin-bottom: 10px; }}
    .code {{ font-weight: 700; }}
    .dbid {{ color: #9aa2b1; margin-left: 8px; }}
    .status {{ display: inline-block; padding: 2px 8px; border-radius: 999px; color: #fff; font-size: 11px; margin-left: 8px; }}
    .meta {{ color: {muted}; font-size: 12px; margin: 6px 0; }}
    details > summary {{ cursor: pointer; list-style: none; }}
    .title {{ font-size: 16px; margin: 6px 0; }}
    .section-label {{ font-weight: 600; margin-top: 8px; }}
    .content {{ margin-top: 4px; white-space: pre-wrap; background: {preview}; padding: 6px; border-radius: 6px; }}
    a.req-link {{ color: #2a7fbd; text-decoration: none; font-weight: 600; }}
    a.req-link:hover {{ color: #1f5f8f; text-decoration: underline; }}
  "#,
        bg = p.background,
        text = p.text,
        panel = p.panel,
        muted = p.muted,
        preview = p.preview,
    )
}

const SCRIPT: &str = r#"
  <script>
    function expandAll() {
      document.querySelectorAll('details').forEach(d => d.open = true);
    }
    function collapseAll() {
      document.querySelectorAll('details').forEach(d => d.open = false);
    }
  </script>"#;

fn link(code: &str) -> String {
    format!(
        r##"<a class="req-link" href="#{}">{}</a>"##,
        anchor_for(code),
        escape_html(code)
    )
}

struct Writer {
    out: String,
    links: BTreeSet<LinkPair>,
}

impl Writer {
    fn segments(&mut self, source: &RenderedNode, segments: &[Segment]) {
        for segment in segments {
            match segment {
                Segment::Text(text) => self.out.push_str(&escape_html(text)),
                Segment::Code(code) => {
                    self.out.push_str(&link(code));
                    self.links.insert((source.id, code.clone()));
                }
                Segment::Verbatim(text) => {
                    self.out.push_str(&format!("<code>{}</code>", escape_html(text.trim_matches('`'))));
                }
            }
        }
    }

    fn node_card(&mut self, node: &RenderedNode) {
        let parent = match &node.parent {
            Some(parent) => link(&parent.code),
            None => "none".to_string(),
        };

        self.out.push_str(&format!("\n<div class=\"node\" id=\"{}\">\n", escape_html(&node.anchor)));
        self.out.push_str(&format!(
            "  <div><span class=\"code\">{}</span><span class=\"dbid\">#{}</span>\n",
            escape_html(&node.label),
            node.id
        ));
        self.out.push_str(&format!(
            "    <span class=\"status\" style=\"background:{}\">{}</span>\n  </div>\n",
            escape_html(&node.status.color),
            escape_html(&node.status.name)
        ));
        self.out.push_str(&format!(
            "  <div class=\"meta\">Type: {} | Number: {} | Parent: {}</div>\n",
            escape_html(&node.type_code),
            escape_html(&node.num_path),
            parent
        ));
        self.out.push_str(&format!("  <div class=\"title\">{}</div>\n", escape_html(&node.title)));

        self.out.push_str("  <div class=\"section-label\">Description</div>\n  <div class=\"content\">");
        self.segments(node, &node.description);
        self.out.push_str("</div>\n");

        self.out.push_str("  <div class=\"section-label\">Rationale</div>\n  <div class=\"content\">");
        if let Some(rationale) = &node.rationale {
            self.segments(node, rationale);
        }
        self.out.push_str("</div>\n</div>");
    }

    fn subtree(&mut self, node: &RenderedNode) {
        let pad = node.depth * 16;
        self.out.push_str(&format!("<div style=\"margin-left:{}px\">", pad));
        if node.children.is_empty() {
            self.node_card(node);
        } else {
            self.out.push_str("<details open><summary>");
            self.node_card(node);
            self.out.push_str("</summary>");
            for child in &node.children {
                self.subtree(child);
            }
            self.out.push_str("</details>");
        }
        self.out.push_str("</div>\n");
    }
}

/// Writes the document as one HTML page needing no running process
pub fn render_static(document: &RenderedDocument, options: &StaticOptions) -> StaticDocument {
    let mut writer = Writer {
        out: String::new(),
        links: BTreeSet::new(),
    };

    writer.out.push_str("<!doctype html>\n<html lang=\"en\">\n<head>\n");
    writer.out.push_str("  <meta charset=\"utf-8\">\n  <title>Requirements Snapshot</title>\n");
    writer.out.push_str(&format!("  <style>{}</style>\n</head>\n<body>\n", stylesheet(options.theme)));
    writer.out.push_str(&format!(
        "  <div class=\"snapshot\">Snapshot | {} | Version {}</div>\n",
        options.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        escape_html(&options.version)
    ));
    writer.out.push_str(
        "  <div class=\"controls\">\n    \
         <button type=\"button\" onclick=\"expandAll()\">Expand All</button>\n    \
         <button type=\"button\" onclick=\"collapseAll()\">Collapse All</button>\n  \
         </div>\n",
    );

    for root in &document.roots {
        writer.subtree(root);
    }

    writer.out.push_str(SCRIPT);
    writer.out.push_str("\n</body>\n</html>\n");

    StaticDocument {
        html: writer.out,
        links: writer.links,
    }
}
