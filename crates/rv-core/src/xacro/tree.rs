//! Owned XML tree for template processing
//!
//! Parsed with `roxmltree`, written back with `quick_xml::Writer`. Comments
//! and processing instructions are dropped. Elements and attributes in the
//! xacro namespace are named `xacro:<local>` whatever prefix the document
//! used for it.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::XacroError;

const XACRO_NAMESPACES: [&str; 2] = ["http://www.ros.org/wiki/xacro", "http://ros.org/wiki/xacro"];
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

pub const XACRO_PREFIX: &str = "xacro:";

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name as written to the output
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Namespace declarations (prefix, uri) first in scope at this element
    pub namespaces: Vec<(Option<String>, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Local name when the element belongs to the xacro namespace
    pub fn xacro_tag(&self) -> Option<&str> {
        self.name.strip_prefix(XACRO_PREFIX)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }
}

type Namespaces = Vec<(Option<String>, String)>;

/// Parse a document into its root element
pub fn parse_document(text: &str) -> Result<Element, XacroError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| XacroError::Xml(e.to_string()))?;
    Ok(convert_element(doc.root_element(), &Vec::new()))
}

fn convert_element(node: roxmltree::Node, inherited: &Namespaces) -> Element {
    let in_scope: Namespaces = node
        .namespaces()
        .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
        .collect();
    let namespaces = in_scope
        .iter()
        .filter(|ns| !inherited.contains(ns))
        .filter(|(_, uri)| !is_xacro_namespace(uri) && uri != XML_NAMESPACE)
        .cloned()
        .collect();

    let attributes = node
        .attributes()
        .map(|attr| {
            (
                qualified_name(node, attr.namespace(), attr.name()),
                attr.value().to_string(),
            )
        })
        .collect();

    let children = node
        .children()
        .filter_map(|child| {
            if child.is_element() {
                Some(XmlNode::Element(convert_element(child, &in_scope)))
            } else if child.is_text() {
                child.text().map(|t| XmlNode::Text(t.to_string()))
            } else {
                None
            }
        })
        .collect();

    let tag = node.tag_name();
    Element {
        name: qualified_name(node, tag.namespace(), tag.name()),
        attributes,
        namespaces,
        children,
    }
}

fn is_xacro_namespace(uri: &str) -> bool {
    XACRO_NAMESPACES.contains(&uri)
}

fn qualified_name(node: roxmltree::Node, namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(uri) if is_xacro_namespace(uri) => format!("{XACRO_PREFIX}{local}"),
        Some(uri) => match node.lookup_prefix(uri) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
            _ => local.to_string(),
        },
        None => local.to_string(),
    }
}

/// Serialize a root element as a standalone document
pub fn write_document(root: &Element) -> Result<String, XacroError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(write_error)?;
    writer
        .write_event(Event::Text(BytesText::new("\n")))
        .map_err(write_error)?;
    write_element(&mut writer, root)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| XacroError::Output(format!("UTF-8 error: {e}")))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XacroError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (prefix, uri) in &element.namespaces {
        let key = match prefix {
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_error);
    }

    writer.write_event(Event::Start(start)).map_err(write_error)?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(write_error)
}

fn write_error(e: impl std::fmt::Display) -> XacroError {
    XacroError::Output(format!("write error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xacro_names_are_normalized() {
        let root = parse_document(
            r#"<robot xmlns:x="http://ros.org/wiki/xacro" name="r"><x:property name="a" value="1"/></robot>"#,
        )
        .unwrap();
        let child = root.child_elements().next().unwrap();
        assert_eq!(child.name, "xacro:property");
        assert_eq!(child.xacro_tag(), Some("property"));
        assert!(root.namespaces.is_empty());
    }

    #[test]
    fn test_comments_dropped_and_namespaces_kept() {
        let root = parse_document(
            r#"<robot xmlns:xacro="http://www.ros.org/wiki/xacro" xmlns:gz="http://gazebosim.org/schema" name="r"><!-- note --><gz:plugin/></robot>"#,
        )
        .unwrap();
        assert_eq!(
            root.namespaces,
            vec![(Some("gz".to_string()), "http://gazebosim.org/schema".to_string())]
        );
        assert_eq!(root.children.len(), 1);

        let plugin = root.child_elements().next().unwrap();
        assert_eq!(plugin.name, "gz:plugin");
        assert!(plugin.namespaces.is_empty());
    }

    #[test]
    fn test_write_escapes_and_nests() {
        let root = Element {
            name: "robot".to_string(),
            attributes: vec![("name".to_string(), "a<b".to_string())],
            namespaces: Vec::new(),
            children: vec![
                XmlNode::Element(Element {
                    name: "link".to_string(),
                    attributes: vec![("name".to_string(), "base".to_string())],
                    namespaces: Vec::new(),
                    children: Vec::new(),
                }),
                XmlNode::Text("x & y".to_string()),
            ],
        };
        let text = write_document(&root).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\"?>"));
        assert!(text.contains(r#"<robot name="a&lt;b"><link name="base"/>x &amp; y</robot>"#));
    }

    #[test]
    fn test_malformed_template() {
        assert!(matches!(parse_document("<robot>"), Err(XacroError::Xml(_))));
    }
}
