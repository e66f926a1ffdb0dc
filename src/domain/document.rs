//! Block-structured chapter documents
//!
//! A [`Document`] is an ordered list of [`Block`]s in the shape produced by
//! block editors: every block has an id, a type, a property map, inline
//! content and nested children. Block contents are otherwise opaque here;
//! the document only knows how to:
//!
//! - serialize itself to a **canonical string** (compact JSON, object keys
//!   sorted) used for dirty checks and persistence,
//! - derive a **plain-text projection** used for headings, search and previews,
//! - convert to and from the markdown working file used by `scribe edit`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Malformed document content: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single editor block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub props: Map<String, Value>,

    /// Inline content: an array of inline items for text blocks, an object
    /// for tables, null for blocks without content
    #[serde(default)]
    pub content: Value,

    #[serde(default)]
    pub children: Vec<Block>,
}

impl Block {
    /// Creates a text-bearing block with default styling props
    fn text_block(position: usize, kind: &str, text: &str, mut props: Map<String, Value>) -> Self {
        props.insert("textColor".into(), json!("default"));
        props.insert("backgroundColor".into(), json!("default"));
        props.insert("textAlignment".into(), json!("left"));

        let content = if text.is_empty() {
            json!([])
        } else {
            json!([{ "type": "text", "text": text, "styles": {} }])
        };

        Self {
            id: block_id(position, kind, text),
            kind: kind.to_string(),
            props,
            content,
            children: Vec::new(),
        }
    }

    /// Creates a paragraph block
    pub fn paragraph(position: usize, text: &str) -> Self {
        Self::text_block(position, "paragraph", text, Map::new())
    }

    /// Creates a heading block (levels are clamped to 1..=3)
    pub fn heading(position: usize, level: u8, text: &str) -> Self {
        let mut props = Map::new();
        props.insert("level".into(), json!(level.clamp(1, 3)));
        props.insert("isToggleable".into(), json!(false));
        Self::text_block(position, "heading", text, props)
    }

    /// Creates a bullet list item
    pub fn bullet(position: usize, text: &str) -> Self {
        Self::text_block(position, "bulletListItem", text, Map::new())
    }

    /// Creates a numbered list item
    pub fn numbered(position: usize, text: &str) -> Self {
        Self::text_block(position, "numberedListItem", text, Map::new())
    }

    /// Returns the concatenated text of this block's inline `text` items,
    /// or None when the content is not an inline array
    pub fn inline_text(&self) -> Option<String> {
        let items = self.content.as_array()?;
        let text = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<String>();
        Some(text)
    }

    /// Heading level, if this is a heading block
    pub fn heading_level(&self) -> Option<u8> {
        if self.kind != "heading" {
            return None;
        }
        let level = self.props.get("level").and_then(Value::as_u64).unwrap_or(1);
        Some(level.clamp(1, 3) as u8)
    }

    /// Builds the canonical JSON value (object keys sorted by `Map`)
    fn canonical_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert("type".into(), Value::String(self.kind.clone()));
        object.insert("props".into(), Value::Object(self.props.clone()));
        object.insert("content".into(), self.content.clone());
        object.insert(
            "children".into(),
            Value::Array(self.children.iter().map(Block::canonical_value).collect()),
        );
        Value::Object(object)
    }
}

/// Derives a stable block id from position, type and text
fn block_id(position: usize, kind: &str, text: &str) -> String {
    let input = format!("{}:{}:{}", position, kind, text);
    let hash = blake3::hash(input.as_bytes());
    hash.to_hex()[..16].to_string()
}

/// An ordered sequence of blocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Document {
    /// Creates a document from blocks
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// The placeholder content of a freshly created chapter
    pub fn initial() -> Self {
        Self::new(vec![Block::paragraph(0, "")])
    }

    /// Returns the blocks
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns true if the document has no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Parses a canonical content string
    pub fn from_canonical(content: &str) -> Result<Self, DocumentError> {
        let blocks: Vec<Block> = serde_json::from_str(content)?;
        Ok(Self { blocks })
    }

    /// Serializes to the canonical content string
    pub fn canonical(&self) -> String {
        Value::Array(self.blocks.iter().map(Block::canonical_value).collect()).to_string()
    }

    /// Text-only projection: one trimmed entry per top-level text block,
    /// empty entries dropped, joined by a blank line
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(Block::inline_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Parses the markdown working-file format
    ///
    /// Supported: `#`..`###` headings, `-`/`*` bullets, `1.` numbered items,
    /// and paragraphs separated by blank lines. Anything else is paragraph
    /// text.
    pub fn from_markdown(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();

        fn flush(blocks: &mut Vec<Block>, paragraph: &mut Vec<&str>) {
            if !paragraph.is_empty() {
                let text = paragraph.join("\n");
                blocks.push(Block::paragraph(blocks.len(), &text));
                paragraph.clear();
            }
        }

        for line in text.lines() {
            let line = line.trim_end();

            if line.trim().is_empty() {
                flush(&mut blocks, &mut paragraph);
                continue;
            }

            if let Some((level, rest)) = parse_heading(line) {
                flush(&mut blocks, &mut paragraph);
                blocks.push(Block::heading(blocks.len(), level, rest));
            } else if let Some(rest) = parse_bullet(line) {
                flush(&mut blocks, &mut paragraph);
                blocks.push(Block::bullet(blocks.len(), rest));
            } else if let Some(rest) = parse_numbered(line) {
                flush(&mut blocks, &mut paragraph);
                blocks.push(Block::numbered(blocks.len(), rest));
            } else {
                paragraph.push(line);
            }
        }
        flush(&mut blocks, &mut paragraph);

        if blocks.is_empty() {
            return Self::initial();
        }

        Self { blocks }
    }

    /// Renders the markdown working-file format
    pub fn to_markdown(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut previous_item: Option<&str> = None;
        let mut number = 0;

        let mut flat = Vec::new();
        flatten(&self.blocks, &mut flat);

        for block in flat {
            let text = block.inline_text().unwrap_or_default();
            let text = text.trim();

            let (rendered, is_item) = match block.kind.as_str() {
                "bulletListItem" => (format!("- {}", text), true),
                "numberedListItem" => {
                    number += 1;
                    (format!("{}. {}", number, text), true)
                }
                _ if text.is_empty() => continue,
                "heading" => {
                    let level = block.heading_level().unwrap_or(1) as usize;
                    (format!("{} {}", "#".repeat(level), text), false)
                }
                _ => (text.to_string(), false),
            };

            if block.kind != "numberedListItem" {
                number = 0;
            }

            // Consecutive items of the same list stay on adjacent lines
            let same_list = is_item && previous_item == Some(block.kind.as_str());
            if !lines.is_empty() && !same_list {
                lines.push(String::new());
            }
            lines.push(rendered.trim_end().to_string());
            previous_item = is_item.then_some(block.kind.as_str());
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn flatten<'a>(blocks: &'a [Block], out: &mut Vec<&'a Block>) {
    for block in blocks {
        out.push(block);
        flatten(&block.children, out);
    }
}

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = line[hashes..].strip_prefix(' ')?;
    Some((hashes as u8, rest.trim()))
}

/// A bare marker is an empty item
fn parse_bullet(line: &str) -> Option<&str> {
    if line == "-" || line == "*" {
        return Some("");
    }
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
}

fn parse_numbered(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    if rest == "." {
        return Some("");
    }
    rest.strip_prefix(". ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# The Road\n\nIt was a cold morning.\nThe fog had not lifted.\n\n- bread\n- salt\n\n1. wake\n2. walk\n";

    #[test]
    fn plain_text_skips_empty_blocks() {
        let doc = Document::new(vec![
            Block::paragraph(0, "  Hello  "),
            Block::paragraph(1, ""),
            Block::heading(2, 1, "World"),
        ]);

        assert_eq!(doc.plain_text(), "Hello\n\nWorld");
    }

    #[test]
    fn plain_text_ignores_non_text_inline_items() {
        let doc = Document::from_canonical(
            r#"[{"id":"a","type":"paragraph","content":[
                {"type":"text","text":"see "},
                {"type":"link","href":"https://example.com","content":[]},
                {"type":"text","text":"here"}]},
               {"id":"b","type":"table","content":{"type":"tableContent","rows":[]}}]"#,
        )
        .unwrap();

        assert_eq!(doc.plain_text(), "see here");
    }

    #[test]
    fn canonical_is_stable_across_key_order() {
        let a = Document::from_canonical(
            r#"[{"id":"x","type":"paragraph","props":{"b":1,"a":2},"content":[]}]"#,
        )
        .unwrap();
        let b = Document::from_canonical(
            r#"[{"type":"paragraph","content":[],"props":{"a":2,"b":1},"id":"x","children":[]}]"#,
        )
        .unwrap();

        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn canonical_roundtrip_preserves_plain_text() {
        let doc = Document::from_markdown(SAMPLE);
        let reloaded = Document::from_canonical(&doc.canonical()).unwrap();

        assert_eq!(reloaded.plain_text(), doc.plain_text());
        assert_eq!(reloaded.canonical(), doc.canonical());
    }

    #[test]
    fn malformed_content_is_an_error() {
        assert!(Document::from_canonical("{not json").is_err());
        assert!(Document::from_canonical(r#"{"id":"x"}"#).is_err());
    }

    #[test]
    fn empty_list_items_survive_the_working_file() {
        let doc = Document::new(vec![
            Block::bullet(0, "bread"),
            Block::bullet(1, ""),
            Block::paragraph(2, "Then"),
            Block::numbered(3, ""),
            Block::numbered(4, "walk"),
        ]);

        let markdown = doc.to_markdown();
        assert_eq!(markdown, "- bread\n-\n\nThen\n\n1.\n2. walk\n");

        let reloaded = Document::from_markdown(&markdown);
        let kinds: Vec<&str> = reloaded.blocks().iter().map(|b| b.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "bulletListItem",
                "bulletListItem",
                "paragraph",
                "numberedListItem",
                "numberedListItem"
            ]
        );
        assert_eq!(reloaded.plain_text(), doc.plain_text());
        assert_eq!(reloaded.to_markdown(), markdown);
    }

    #[test]
    fn markdown_parse_block_kinds() {
        let doc = Document::from_markdown(SAMPLE);
        let kinds: Vec<&str> = doc.blocks().iter().map(|b| b.kind.as_str()).collect();

        assert_eq!(
            kinds,
            vec![
                "heading",
                "paragraph",
                "bulletListItem",
                "bulletListItem",
                "numberedListItem",
                "numberedListItem"
            ]
        );
        assert_eq!(doc.blocks()[0].heading_level(), Some(1));
        assert_eq!(
            doc.blocks()[1].inline_text().unwrap(),
            "It was a cold morning.\nThe fog had not lifted."
        );
    }

    #[test]
    fn markdown_reparse_is_byte_identical() {
        let first = Document::from_markdown(SAMPLE);
        let second = Document::from_markdown(&first.to_markdown());

        assert_eq!(first.canonical(), second.canonical());
    }

    #[test]
    fn markdown_render() {
        let doc = Document::from_markdown(SAMPLE);
        assert_eq!(doc.to_markdown(), SAMPLE);
    }

    #[test]
    fn empty_markdown_gives_initial_document() {
        let doc = Document::from_markdown("\n\n   \n");
        assert_eq!(doc, Document::initial());
        assert_eq!(doc.plain_text(), "");
    }

    #[test]
    fn heading_needs_space_after_hashes() {
        let doc = Document::from_markdown("#hashtag\n");
        assert_eq!(doc.blocks()[0].kind, "paragraph");

        let doc = Document::from_markdown("#### too deep\n");
        assert_eq!(doc.blocks()[0].kind, "paragraph");
    }

    #[test]
    fn edit_changes_canonical() {
        let a = Document::from_markdown("Hello\n");
        let b = Document::from_markdown("Hello!\n");
        assert_ne!(a.canonical(), b.canonical());
    }
}
