//! Minimal XML DOM for S3 responses and batch-delete request bodies.
//!
//! S3's listing, versions-listing, batch-delete, and STS responses are all
//! shallow, attribute-free element trees, so a small recursive `Node` built
//! once over `quick_xml`'s pull parser covers every call site without
//! pulling in a full tree library. No example repo in the pack parses XML;
//! `quick_xml` is the crate the wider Rust ecosystem reaches for here.

use std::collections::VecDeque;

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|c| c.text.clone())
    }
}

/// Parse a full document into its root element.
pub fn parse(data: &[u8]) -> Result<Node> {
    let mut reader = Reader::from_reader(data);
    reader.trim_text(true);

    // Stack of (node, text buffer) being built; top is the innermost open element.
    let mut stack: VecDeque<Node> = VecDeque::new();
    let mut root: Option<Node> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf).context("reading xml event")? {
            Event::Start(ref e) => {
                stack.push_back(Node {
                    name: element_name(e)?,
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Event::Empty(ref e) => {
                let node = Node {
                    name: element_name(e)?,
                    text: String::new(),
                    children: Vec::new(),
                };
                push_finished(&mut stack, &mut root, node);
            }
            Event::Text(e) => {
                let text = e.unescape_and_decode(&reader).context("decoding xml text")?;
                if let Some(top) = stack.back_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let node = stack.pop_back().context("unmatched closing xml tag")?;
                push_finished(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.context("empty xml document")
}

fn push_finished(stack: &mut VecDeque<Node>, root: &mut Option<Node>, node: Node) {
    if let Some(parent) = stack.back_mut() {
        parent.children.push(node);
    } else {
        *root = Some(node);
    }
}

fn element_name(e: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(e.name()).map(str::to_owned).context("element name is not utf-8")
}

/// Builder for the `<Delete><Quiet/><Object><Key>...</Key></Object>...</Delete>`
/// batch-delete body.
pub struct DeleteBatchBuilder {
    keys: Vec<String>,
}

impl DeleteBatchBuilder {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn push(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn into_xml(self) -> Vec<u8> {
        let mut out = String::from("<Delete><Quiet>true</Quiet>");
        for key in self.keys {
            out.push_str("<Object><Key>");
            out.push_str(&escape(&key));
            out.push_str("</Key></Object>");
        }
        out.push_str("</Delete>");
        out.into_bytes()
    }
}

impl Default for DeleteBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Keys reported in `<Error><Key>...</Key></Error>` elements of a batch
/// delete response, in document order, for single-key retry.
pub fn delete_response_error_keys(data: &[u8]) -> Result<Vec<String>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let root = parse(data)?;
    let mut keys = Vec::new();
    for error in root.children_named("Error") {
        let key = error.child_text("Key").context("Error element missing Key")?;
        keys.push(key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_listing_response() {
        let xml = br#"<ListBucketResult><IsTruncated>false</IsTruncated><Contents><Key>a/b</Key><Size>42</Size></Contents></ListBucketResult>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.name, "ListBucketResult");
        assert_eq!(root.child_text("IsTruncated"), Some("false".to_string()));
        let contents = root.child("Contents").unwrap();
        assert_eq!(contents.child_text("Key"), Some("a/b".to_string()));
        assert_eq!(contents.child_text("Size"), Some("42".to_string()));
    }

    #[test]
    fn delete_batch_builder_renders_quiet_and_keys() {
        let mut b = DeleteBatchBuilder::new();
        b.push("a");
        b.push("b");
        let xml = String::from_utf8(b.into_xml()).unwrap();
        assert!(xml.starts_with("<Delete><Quiet>true</Quiet>"));
        assert!(xml.contains("<Object><Key>a</Key></Object>"));
        assert!(xml.contains("<Object><Key>b</Key></Object>"));
    }

    #[test]
    fn error_keys_extracted_in_document_order() {
        let xml = br#"<DeleteResult><Deleted><Key>a</Key></Deleted><Error><Key>b</Key></Error></DeleteResult>"#;
        let keys = delete_response_error_keys(xml).unwrap();
        assert_eq!(keys, vec!["b".to_string()]);
    }

    #[test]
    fn empty_response_has_no_errors() {
        assert!(delete_response_error_keys(b"").unwrap().is_empty());
    }
}
