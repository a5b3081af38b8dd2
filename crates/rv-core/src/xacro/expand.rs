//! Template expansion: properties, args, macros, conditionals and includes

use std::collections::HashMap;
use std::rc::Rc;

use crate::constants::XACRO_MAX_DEPTH;

use super::XacroExpander;
use super::XacroError;
use super::eval::{Value, Variables, evaluate};
use super::tree::{Element, XACRO_PREFIX, XmlNode, parse_document};

#[derive(Debug, Clone)]
enum Property {
    /// Unevaluated text, evaluated in its defining scope on every use
    Lazy(String),
    /// Final text
    Text(String),
    Block(Vec<XmlNode>),
}

#[derive(Debug, Clone, PartialEq)]
enum ParamKind {
    Value,
    /// `*name`: the next element child of the call
    Block,
    /// `**name`: all children of the call
    Content,
}

#[derive(Debug, Clone, PartialEq)]
enum ParamDefault {
    None,
    Value(String),
    /// `^` or `^|fallback`: taken from the caller's scope
    Inherit(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
struct MacroParam {
    name: String,
    kind: ParamKind,
    default: ParamDefault,
}

#[derive(Debug)]
struct Macro {
    name: String,
    params: Vec<MacroParam>,
    body: Vec<XmlNode>,
}

#[derive(Debug, Default)]
struct Scope {
    properties: HashMap<String, Property>,
    macros: HashMap<String, Rc<Macro>>,
}

/// State of one `expand` call
pub(super) struct Expansion<'e, 'a> {
    expander: &'e XacroExpander<'a>,
    args: HashMap<String, String>,
    scopes: Vec<Scope>,
    depth: usize,
}

impl<'e, 'a> Expansion<'e, 'a> {
    pub(super) fn new(expander: &'e XacroExpander<'a>) -> Self {
        Self {
            expander,
            args: expander.args.clone(),
            scopes: vec![Scope::default()],
            depth: 0,
        }
    }

    /// Expand a template's root element
    pub(super) fn expand_root(&mut self, root: &Element) -> Result<Element, XacroError> {
        if let Some(tag) = root.xacro_tag() {
            return Err(XacroError::InvalidDirective(format!(
                "root element cannot be xacro:{tag}"
            )));
        }
        self.expand_plain_element(root)
    }

    // ============== Nodes ==============

    fn expand_nodes(&mut self, nodes: &[XmlNode]) -> Result<Vec<XmlNode>, XacroError> {
        let mut output = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                XmlNode::Text(text) => output.push(XmlNode::Text(self.eval_text(text)?)),
                XmlNode::Element(element) => match element.xacro_tag() {
                    Some(tag) => output.extend(self.expand_directive(tag, element)?),
                    None => output.push(XmlNode::Element(self.expand_plain_element(element)?)),
                },
            }
        }
        Ok(output)
    }

    fn expand_plain_element(&mut self, element: &Element) -> Result<Element, XacroError> {
        let mut attributes = Vec::with_capacity(element.attributes.len());
        for (key, value) in &element.attributes {
            if key.starts_with(XACRO_PREFIX) {
                continue;
            }
            attributes.push((key.clone(), self.eval_text(value)?));
        }

        Ok(Element {
            name: element.name.clone(),
            attributes,
            namespaces: element.namespaces.clone(),
            children: self.expand_nodes(&element.children)?,
        })
    }

    fn expand_directive(&mut self, tag: &str, element: &Element) -> Result<Vec<XmlNode>, XacroError> {
        match tag {
            "property" => {
                self.define_property(element)?;
                Ok(Vec::new())
            }
            "arg" => {
                self.define_arg(element)?;
                Ok(Vec::new())
            }
            "macro" => {
                self.define_macro(element)?;
                Ok(Vec::new())
            }
            "if" | "unless" => {
                let value = self.eval_text(required(element, "value")?)?;
                let condition = parse_condition(&value)?;
                if condition == (tag == "if") {
                    self.expand_nodes(&element.children)
                } else {
                    Ok(Vec::new())
                }
            }
            "insert_block" => {
                let name = self.eval_text(required(element, "name")?)?;
                match self.find_property(&name) {
                    Some((_, Property::Block(nodes))) => self.expand_nodes(&nodes),
                    Some(_) => Err(XacroError::InvalidDirective(format!(
                        "property '{name}' is not a block"
                    ))),
                    None => Err(XacroError::UndefinedProperty(name)),
                }
            }
            "include" => self.include(element),
            _ => self.call_macro(tag, element),
        }
    }

    // ============== Definitions ==============

    fn define_property(&mut self, element: &Element) -> Result<(), XacroError> {
        let name = required(element, "name")?.to_string();
        let property = match element.attribute("value") {
            Some(value) => Property::Lazy(value.to_string()),
            None => match element.attribute("default") {
                Some(default) => {
                    if self.find_property(&name).is_some() {
                        return Ok(());
                    }
                    Property::Lazy(default.to_string())
                }
                None => Property::Block(element.children.clone()),
            },
        };

        let level = match element.attribute("scope") {
            Some("global") => 0,
            Some("parent") => self.scopes.len().saturating_sub(2),
            _ => self.scopes.len() - 1,
        };
        tracing::trace!("xacro property '{}' at scope {}", name, level);
        self.scopes[level].properties.insert(name, property);
        Ok(())
    }

    fn define_arg(&mut self, element: &Element) -> Result<(), XacroError> {
        let name = required(element, "name")?.to_string();
        if !self.args.contains_key(&name)
            && let Some(default) = element.attribute("default")
        {
            let value = self.eval_text(default)?;
            self.args.insert(name, value);
        }
        Ok(())
    }

    fn define_macro(&mut self, element: &Element) -> Result<(), XacroError> {
        let name = required(element, "name")?.to_string();
        let params = element
            .attribute("params")
            .map(parse_params)
            .unwrap_or_default();

        let definition = Macro {
            name: name.clone(),
            params,
            body: element.children.clone(),
        };
        self.current_scope().macros.insert(name, Rc::new(definition));
        Ok(())
    }

    // ============== Macro Calls ==============

    fn call_macro(&mut self, name: &str, call: &Element) -> Result<Vec<XmlNode>, XacroError> {
        let definition = self
            .find_macro(name)
            .ok_or_else(|| XacroError::UnknownMacro(name.to_string()))?;

        if let Some((key, _)) = call
            .attributes
            .iter()
            .find(|(key, _)| !definition.params.iter().any(|p| &p.name == key))
        {
            return Err(XacroError::InvalidDirective(format!(
                "macro '{name}' has no parameter '{key}'"
            )));
        }

        let mut scope = Scope::default();
        let mut blocks = call.child_elements();
        for param in &definition.params {
            let property = match param.kind {
                ParamKind::Block => {
                    let block = blocks.next().ok_or_else(|| XacroError::MissingParameter {
                        macro_name: name.to_string(),
                        param: format!("*{}", param.name),
                    })?;
                    Property::Block(vec![XmlNode::Element(block.clone())])
                }
                ParamKind::Content => Property::Block(call.children.clone()),
                ParamKind::Value => self.bind_value_param(&definition, param, call)?,
            };
            scope.properties.insert(param.name.clone(), property);
        }

        self.enter(name)?;
        self.scopes.push(scope);
        let result = self.expand_nodes(&definition.body);
        self.scopes.pop();
        self.leave();
        result
    }

    fn bind_value_param(
        &mut self,
        definition: &Macro,
        param: &MacroParam,
        call: &Element,
    ) -> Result<Property, XacroError> {
        if let Some(value) = call.attribute(&param.name) {
            return Ok(Property::Text(self.eval_text(value)?));
        }

        match &param.default {
            ParamDefault::Value(default) => Ok(Property::Lazy(default.clone())),
            ParamDefault::Inherit(fallback) => {
                if self.find_property(&param.name).is_some() {
                    return Ok(Property::Text(self.lookup_property(&param.name)?));
                }
                fallback
                    .clone()
                    .map(Property::Lazy)
                    .ok_or_else(|| XacroError::UndefinedProperty(param.name.clone()))
            }
            ParamDefault::None => Err(XacroError::MissingParameter {
                macro_name: definition.name.clone(),
                param: param.name.clone(),
            }),
        }
    }

    // ============== Includes ==============

    fn include(&mut self, element: &Element) -> Result<Vec<XmlNode>, XacroError> {
        let filename = self.eval_text(required(element, "filename")?)?;
        let url = self.expander.resolver.resolve(&filename);
        tracing::debug!("xacro include '{}' from {}", filename, url);

        let text = self
            .expander
            .fetcher
            .fetch_text(&url)
            .map_err(|e| XacroError::Include {
                file: filename.clone(),
                reason: e.to_string(),
            })?;
        let root = parse_document(&text).map_err(|e| XacroError::Include {
            file: filename.clone(),
            reason: e.to_string(),
        })?;

        self.enter(&filename)?;
        let result = self.expand_nodes(&root.children);
        self.leave();
        result
    }

    // ============== Scopes ==============

    fn current_scope(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn find_property(&self, name: &str) -> Option<(usize, Property)> {
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(level, scope)| scope.properties.get(name).map(|p| (level, p.clone())))
    }

    fn find_macro(&self, name: &str) -> Option<Rc<Macro>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.macros.get(name).cloned())
    }

    /// Text of a property, evaluating lazy values where they were defined
    fn lookup_property(&mut self, name: &str) -> Result<String, XacroError> {
        match self.find_property(name) {
            Some((_, Property::Text(text))) => Ok(text),
            Some((level, Property::Lazy(raw))) => {
                self.enter(name)?;
                let hidden = self.scopes.split_off(level + 1);
                let result = self.eval_text(&raw);
                self.scopes.extend(hidden);
                self.leave();
                result
            }
            Some((_, Property::Block(_))) => Err(XacroError::Expression(format!(
                "block property '{name}' used in an expression"
            ))),
            None => Err(XacroError::UndefinedProperty(name.to_string())),
        }
    }

    fn enter(&mut self, what: &str) -> Result<(), XacroError> {
        self.depth += 1;
        if self.depth > XACRO_MAX_DEPTH {
            self.depth -= 1;
            return Err(XacroError::RecursionLimit(what.to_string()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ============== Substitution ==============

    /// Substitute `${...}` and `$(...)` in attribute or text content
    pub(super) fn eval_text(&mut self, text: &str) -> Result<String, XacroError> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }

        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('$') {
            output.push_str(&rest[..start]);
            let tail = &rest[start..];

            if tail.starts_with("$${") || tail.starts_with("$$(") {
                output.push_str(&tail[1..3]);
                rest = &tail[3..];
            } else if let Some(body) = tail.strip_prefix("${") {
                let end = closing_brace(body).ok_or_else(|| {
                    XacroError::Expression(format!("unterminated '${{' in '{text}'"))
                })?;
                let value = evaluate(&body[..end], self)?;
                output.push_str(&value.to_string());
                rest = &body[end + 1..];
            } else if let Some(body) = tail.strip_prefix("$(") {
                let end = closing_paren(body).ok_or_else(|| {
                    XacroError::Expression(format!("unterminated '$(' in '{text}'"))
                })?;
                output.push_str(&self.substitution_command(&body[..end])?);
                rest = &body[end + 1..];
            } else {
                output.push('$');
                rest = &tail[1..];
            }
        }
        output.push_str(rest);
        Ok(output)
    }

    fn substitution_command(&mut self, command: &str) -> Result<String, XacroError> {
        let command = command.trim();
        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(n, a)| (n, a.trim()))
            .unwrap_or((command, ""));
        let resolver = self.expander.resolver;

        match name {
            "find" => Ok(resolver.package_path(argument)),
            "optenv" => {
                let (variable, default) = argument
                    .split_once(char::is_whitespace)
                    .map(|(v, d)| (v, d.trim()))
                    .unwrap_or((argument, ""));
                Ok(resolver.optenv(variable, default).to_string())
            }
            "arg" => self
                .args
                .get(argument)
                .cloned()
                .ok_or_else(|| XacroError::UndefinedArgument(argument.to_string())),
            "eval" => {
                let expr = self.eval_text(argument)?;
                Ok(evaluate(&expr, self)?.to_string())
            }
            "dirname" => Ok(resolver.working_path().to_string()),
            _ => Err(XacroError::UnknownCommand(command.to_string())),
        }
    }
}

impl Variables for Expansion<'_, '_> {
    fn lookup(&mut self, name: &str) -> Result<Value, XacroError> {
        self.lookup_property(name).map(|text| Value::from_text(&text))
    }
}

fn required<'e>(element: &'e Element, attribute: &str) -> Result<&'e str, XacroError> {
    element.attribute(attribute).ok_or_else(|| {
        XacroError::InvalidDirective(format!(
            "<{}> requires a '{}' attribute",
            element.name, attribute
        ))
    })
}

fn parse_condition(value: &str) -> Result<bool, XacroError> {
    match value.trim() {
        "true" | "True" => Ok(true),
        "false" | "False" => Ok(false),
        other => other
            .parse::<f64>()
            .map(|n| n != 0.0)
            .map_err(|_| XacroError::InvalidDirective(format!("invalid boolean '{other}'"))),
    }
}

fn parse_params(spec: &str) -> Vec<MacroParam> {
    spec.split_whitespace()
        .map(|token| {
            let (kind, token) = if let Some(rest) = token.strip_prefix("**") {
                (ParamKind::Content, rest)
            } else if let Some(rest) = token.strip_prefix('*') {
                (ParamKind::Block, rest)
            } else {
                (ParamKind::Value, token)
            };

            let (name, default) = match token.split_once(":=").or_else(|| token.split_once('=')) {
                Some((name, "^")) => (name, ParamDefault::Inherit(None)),
                Some((name, value)) => match value.strip_prefix("^|") {
                    Some(fallback) => (name, ParamDefault::Inherit(Some(fallback.to_string()))),
                    None => (name, ParamDefault::Value(value.to_string())),
                },
                None => (token, ParamDefault::None),
            };

            MacroParam {
                name: name.to_string(),
                kind,
                default,
            }
        })
        .collect()
}

/// Index of the `}` closing an expression, skipping quoted strings
fn closing_brace(body: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Index of the `)` closing a substitution command
fn closing_paren(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}
