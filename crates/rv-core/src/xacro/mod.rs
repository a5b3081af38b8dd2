//! XACRO macro expansion into plain URDF

mod eval;
mod expand;
mod tree;

use std::collections::HashMap;

use crate::fetch::ResourceFetcher;
use crate::resolve::PathResolver;

use expand::Expansion;

/// Whether a description needs macro expansion before parsing
pub fn is_xacro(text: &str) -> bool {
    text.contains("xacro")
}

/// Expands xacro templates
///
/// Includes are fetched through `fetcher` at the URL `resolver` gives for
/// their `filename`.
pub struct XacroExpander<'a> {
    resolver: &'a PathResolver,
    fetcher: &'a dyn ResourceFetcher,
    args: HashMap<String, String>,
}

impl<'a> XacroExpander<'a> {
    pub fn new(resolver: &'a PathResolver, fetcher: &'a dyn ResourceFetcher) -> Self {
        Self {
            resolver,
            fetcher,
            args: HashMap::new(),
        }
    }

    /// Values for `xacro:arg` declarations, overriding their defaults
    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args = args;
        self
    }

    /// Expand a template into URDF document text
    pub fn expand(&self, source: &str) -> Result<String, XacroError> {
        let root = tree::parse_document(source)?;
        let expanded = Expansion::new(self).expand_root(&root)?;
        let urdf = tree::write_document(&expanded)?;
        tracing::debug!("xacro expanded to {} bytes of URDF", urdf.len());
        Ok(urdf)
    }
}

/// Xacro expansion errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XacroError {
    #[error("Malformed template XML: {0}")]
    Xml(String),

    #[error("Unknown macro: {0}")]
    UnknownMacro(String),

    #[error("Macro '{macro_name}' called without parameter '{param}'")]
    MissingParameter { macro_name: String, param: String },

    #[error("Undefined property: {0}")]
    UndefinedProperty(String),

    #[error("Undefined argument: {0}")]
    UndefinedArgument(String),

    #[error("Unsupported substitution command: $({0})")]
    UnknownCommand(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Failed to include '{file}': {reason}")]
    Include { file: String, reason: String },

    #[error("Recursion limit reached in '{0}'")]
    RecursionLimit(String),

    #[error("Failed to write expanded document: {0}")]
    Output(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    const NS: &str = r#"xmlns:xacro="http://www.ros.org/wiki/xacro""#;

    fn expand_with(source: &str, fetcher: &MemoryFetcher, args: &[(&str, &str)]) -> Result<String, XacroError> {
        let resolver = PathResolver::new("http://host/", "robot");
        let args = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        XacroExpander::new(&resolver, fetcher)
            .with_args(args)
            .expand(source)
    }

    fn expand(body: &str) -> Result<String, XacroError> {
        let source = format!(r#"<robot name="r" {NS}>{body}</robot>"#);
        expand_with(&source, &MemoryFetcher::new(), &[])
    }

    #[test]
    fn test_detection() {
        assert!(is_xacro(&format!("<robot {NS}/>")));
        assert!(!is_xacro("<robot name=\"plain\"/>"));
    }

    #[test]
    fn test_properties_and_expressions() {
        let urdf = expand(
            r#"<xacro:property name="len" value="${2 * half}"/>
<xacro:property name="half" value="0.25"/>
<link name="l" length="${len}" angle="${half &lt; 1}" far="${len &gt;= 1}"/>"#,
        )
        .unwrap();
        assert!(urdf.contains(r#"<link name="l" length="0.5" angle="True" far="False"/>"#));
        assert!(!urdf.contains("xacro"));
    }

    #[test]
    fn test_macro_with_defaults_and_blocks() {
        let urdf = expand(
            r#"<xacro:macro name="arm" params="prefix parent:=base *origin">
  <joint name="${prefix}_joint" type="fixed">
    <xacro:insert_block name="origin"/>
    <parent link="${parent}"/>
    <child link="${prefix}_link"/>
  </joint>
</xacro:macro>
<xacro:arm prefix="left"><origin xyz="0 1 0"/></xacro:arm>"#,
        )
        .unwrap();
        assert!(urdf.contains(r#"<joint name="left_joint" type="fixed">"#));
        assert!(urdf.contains(r#"<origin xyz="0 1 0"/>"#));
        assert!(urdf.contains(r#"<parent link="base"/>"#));
        assert!(urdf.contains(r#"<child link="left_link"/>"#));
    }

    #[test]
    fn test_content_and_inherited_params() {
        let urdf = expand(
            r#"<xacro:property name="color" value="red"/>
<xacro:macro name="wrap" params="color:=^ size:=^|3 **content">
  <group color="${color}" size="${size}"><xacro:insert_block name="content"/></group>
</xacro:macro>
<xacro:wrap><a/><b/></xacro:wrap>"#,
        )
        .unwrap();
        assert!(urdf.contains(r#"<group color="red" size="3"><a/><b/></group>"#));
    }

    #[test]
    fn test_conditionals() {
        let urdf = expand(
            r#"<xacro:property name="flag" value="true"/>
<xacro:if value="${flag}"><yes/></xacro:if>
<xacro:unless value="${flag}"><no/></xacro:unless>
<xacro:if value="${1 > 2}"><never/></xacro:if>"#,
        )
        .unwrap();
        assert!(urdf.contains("<yes/>"));
        assert!(!urdf.contains("<no/>"));
        assert!(!urdf.contains("<never/>"));
    }

    #[test]
    fn test_args_and_substitution_commands() {
        let source = format!(
            r#"<robot name="r" {NS}>
<xacro:arg name="side" default="left"/>
<xacro:arg name="count" default="1"/>
<mesh filename="$(find arm)/meshes/$(arg side).stl"
      home="$(optenv HOME /fallback)" dir="$(dirname)"
      total="$(eval 2 * $(arg count))" literal="$${{x}}"/>
</robot>"#
        );
        let urdf = expand_with(&source, &MemoryFetcher::new(), &[("count", "4")]).unwrap();
        assert!(urdf.contains(r#"filename="/robot/arm/meshes/left.stl""#));
        assert!(urdf.contains(r#"home="/fallback""#));
        assert!(urdf.contains(r#"dir="/robot""#));
        assert!(urdf.contains(r#"total="8""#));
        assert!(urdf.contains(r#"literal="${x}""#));
    }

    #[test]
    fn test_include_through_fetcher() {
        let fetcher = MemoryFetcher::new().with(
            "http://host/files/robot/urdf/parts.xacro",
            format!(
                r#"<robot {NS}><xacro:macro name="part" params="n"><link name="${{n}}"/></xacro:macro></robot>"#
            ),
        );
        let source = format!(
            r#"<robot name="r" {NS}><xacro:include filename="urdf/parts.xacro"/><xacro:part n="wheel"/></robot>"#
        );
        let urdf = expand_with(&source, &fetcher, &[]).unwrap();
        assert!(urdf.contains(r#"<link name="wheel"/>"#));
    }

    #[test]
    fn test_other_namespaces_survive() {
        let source = format!(
            r#"<robot name="r" {NS} xmlns:gz="http://gazebosim.org/schema"><gz:plugin/></robot>"#
        );
        let urdf = expand_with(&source, &MemoryFetcher::new(), &[]).unwrap();
        assert!(urdf.contains(r#"xmlns:gz="http://gazebosim.org/schema""#));
        assert!(!urdf.contains("xmlns:xacro"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(expand("<xacro:nothing/>"), Err(XacroError::UnknownMacro(m)) if m == "nothing"));
        assert!(matches!(
            expand(r#"<xacro:macro name="m" params="a"/><xacro:m/>"#),
            Err(XacroError::MissingParameter { param, .. }) if param == "a"
        ));
        assert!(matches!(
            expand(r#"<link name="${missing}"/>"#),
            Err(XacroError::UndefinedProperty(_))
        ));
        assert!(matches!(
            expand(r#"<link name="$(env HOME)"/>"#),
            Err(XacroError::UnknownCommand(_))
        ));
        assert!(matches!(
            expand(r#"<link name="${1 +}"/>"#),
            Err(XacroError::Expression(_))
        ));
        assert!(matches!(
            expand(r#"<xacro:include filename="gone.xacro"/>"#),
            Err(XacroError::Include { .. })
        ));
        assert!(matches!(
            expand(r#"<xacro:macro name="loop"><xacro:loop/></xacro:macro><xacro:loop/>"#),
            Err(XacroError::RecursionLimit(_))
        ));
        assert!(matches!(
            expand(r#"<xacro:property name="a" value="${a}"/><x v="${a}"/>"#),
            Err(XacroError::RecursionLimit(_))
        ));
        assert!(matches!(
            expand_with("<robot", &MemoryFetcher::new(), &[]),
            Err(XacroError::Xml(_))
        ));
    }
}
