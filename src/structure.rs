//! Member and reference outline of a decompiled class, from the tree-sitter
//! Java grammar.

use std::collections::BTreeSet;
use tree_sitter::{Node, Parser};

use crate::model::{Modifier, ModifierSet};

#[derive(Debug, Clone, Default)]
pub struct ClassOutline {
    pub package: String,
    pub imports: Vec<String>,
    /// Simple name of the outlined type declaration.
    pub type_name: String,
    pub methods: Vec<MethodOutline>,
    pub fields: Vec<FieldOutline>,
    /// Type names mentioned anywhere in the file, simple and qualified.
    pub type_refs: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MethodOutline {
    pub name: String,
    pub parameters: Vec<String>,
    pub modifiers: ModifierSet,
    /// Names of invoked or referenced methods.
    pub calls: BTreeSet<String>,
    /// Identifiers read or written in the body, field accesses included.
    pub names: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldOutline {
    pub name: String,
    pub modifiers: ModifierSet,
}

impl ClassOutline {
    /// The file refers to `full_name` by simple name (same package or
    /// imported) or spells it out.
    pub fn mentions_type(&self, full_name: &str) -> bool {
        let source_name = full_name.replace('$', ".");
        if self.type_refs.contains(&source_name) {
            return true;
        }

        let (package, simple) = match full_name.rsplit_once('.') {
            Some((p, s)) => (p, s),
            None => ("", full_name),
        };
        let (outer, simple) = match simple.split_once('$') {
            Some((outer, _)) => (outer, simple.rsplit('$').next().unwrap_or(simple)),
            None => (simple, simple),
        };
        if !self.type_refs.contains(simple) {
            return false;
        }

        let outer_full = if package.is_empty() {
            outer.to_string()
        } else {
            format!("{package}.{outer}")
        };
        self.package == package
            || self.imports.iter().any(|imp| {
                imp == &outer_full
                    || imp == &source_name
                    || imp.strip_suffix(".*").is_some_and(|p| p == package)
            })
    }
}

/// Outlines the type called `type_name` (or the first type declared) in
/// `source`. `None` when the source does not parse into a type.
pub fn parse_class_outline(source: &str, type_name: &str) -> Option<ClassOutline> {
    if source.trim().is_empty() {
        return None;
    }

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    let bytes = source.as_bytes();

    let mut outline = ClassOutline::default();
    let mut declarations = Vec::new();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "package_declaration" => {
                outline.package = extract_package(&child, bytes);
            }
            "import_declaration" => {
                if let Some(imp) = extract_import(&child, bytes) {
                    outline.imports.push(imp);
                }
            }
            kind if is_type_declaration(kind) => declarations.push(child),
            _ => {}
        }
    }

    let declaration = declarations
        .iter()
        .find(|d| declared_name(d, bytes) == Some(type_name))
        .or_else(|| declarations.first())?;
    let declared = declared_name(declaration, bytes)?.to_string();
    extract_members(declaration, bytes, &declared, &mut outline);
    outline.type_name = declared;

    visit(root, &mut |node| match node.kind() {
        "type_identifier" | "scoped_type_identifier" => {
            outline.type_refs.insert(node_text(&node, bytes).to_string());
        }
        // `Util.call()` and `Util.FIELD` parse the receiver as an identifier.
        "identifier" if starts_uppercase(node_text(&node, bytes)) => {
            outline.type_refs.insert(node_text(&node, bytes).to_string());
        }
        _ => {}
    });

    Some(outline)
}

fn is_type_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "class_declaration"
            | "interface_declaration"
            | "enum_declaration"
            | "record_declaration"
            | "annotation_type_declaration"
    )
}

fn declared_name<'s>(node: &Node, source: &'s [u8]) -> Option<&'s str> {
    node.child_by_field_name("name")
        .map(|n| node_text(&n, source))
}

fn extract_package(node: &Node, source: &[u8]) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
            return node_text(&child, source).to_string();
        }
    }
    String::new()
}

fn extract_import(node: &Node, source: &[u8]) -> Option<String> {
    let mut path = String::new();
    let mut wildcard = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "scoped_identifier" | "identifier" => {
                path = node_text(&child, source).to_string();
            }
            "asterisk" => wildcard = true,
            _ => {}
        }
    }

    if path.is_empty() {
        None
    } else if wildcard {
        Some(format!("{path}.*"))
    } else {
        Some(path)
    }
}

fn extract_members(node: &Node, source: &[u8], type_name: &str, outline: &mut ClassOutline) {
    let Some(body) = find_body(node) else {
        return;
    };

    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        match child.kind() {
            "enum_body_declarations" => {
                let mut inner_cursor = child.walk();
                for inner in child.children(&mut inner_cursor) {
                    extract_member(&inner, source, type_name, outline);
                }
            }
            "enum_constant" => {
                if let Some(name) = declared_name(&child, source) {
                    outline.fields.push(FieldOutline {
                        name: name.to_string(),
                        modifiers: ModifierSet::empty()
                            .with(Modifier::Public)
                            .with(Modifier::Static)
                            .with(Modifier::Final),
                    });
                }
            }
            _ => extract_member(&child, source, type_name, outline),
        }
    }
}

fn extract_member(node: &Node, source: &[u8], type_name: &str, outline: &mut ClassOutline) {
    match node.kind() {
        "field_declaration" | "constant_declaration" => {
            let modifiers = extract_modifiers(node, source);
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                if let Some(name) = declared_name(&declarator, source) {
                    outline.fields.push(FieldOutline {
                        name: name.to_string(),
                        modifiers,
                    });
                }
            }
        }
        "method_declaration" | "annotation_type_element_declaration" => {
            if let Some(name) = declared_name(node, source) {
                outline
                    .methods
                    .push(extract_method(node, source, name.to_string()));
            }
        }
        "constructor_declaration" | "compact_constructor_declaration" => {
            outline
                .methods
                .push(extract_method(node, source, type_name.to_string()));
        }
        _ => {}
    }
}

fn extract_method(node: &Node, source: &[u8], name: String) -> MethodOutline {
    let mut method = MethodOutline {
        name,
        modifiers: extract_modifiers(node, source),
        ..MethodOutline::default()
    };

    if let Some(params) = node.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        for param in params.children(&mut cursor) {
            if !matches!(param.kind(), "formal_parameter" | "spread_parameter") {
                continue;
            }
            let ty = param
                .child_by_field_name("type")
                .map(|t| node_text(&t, source))
                .unwrap_or_else(|| node_text(&param, source));
            method.parameters.push(normalize_whitespace(ty));
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        visit(body, &mut |n| match n.kind() {
            "method_invocation" => {
                if let Some(name) = n.child_by_field_name("name") {
                    method.calls.insert(node_text(&name, source).to_string());
                }
            }
            "method_reference" => {
                let mut cursor = n.walk();
                if let Some(last) = n
                    .children(&mut cursor)
                    .filter(|c| c.kind() == "identifier")
                    .last()
                {
                    method.calls.insert(node_text(&last, source).to_string());
                }
            }
            "identifier" if !is_invocation_name(&n) => {
                method.names.insert(node_text(&n, source).to_string());
            }
            _ => {}
        });
    }

    method
}

fn is_invocation_name(node: &Node) -> bool {
    node.parent().is_some_and(|p| {
        p.kind() == "method_invocation"
            && p.child_by_field_name("name").is_some_and(|n| n.id() == node.id())
    })
}

fn extract_modifiers(node: &Node, source: &[u8]) -> ModifierSet {
    let mut set = ModifierSet::empty();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "modifiers" {
            continue;
        }
        let mut inner = child.walk();
        for token in child.children(&mut inner) {
            if let Some(m) = Modifier::from_keyword(node_text(&token, source)) {
                set.insert(m);
            }
        }
    }
    set
}

fn find_body<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_body" | "interface_body" | "enum_body" | "annotation_type_body" => {
                return Some(child);
            }
            _ => {}
        }
    }
    None
}

fn visit<'t>(node: Node<'t>, f: &mut dyn FnMut(Node<'t>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, f);
    }
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_uppercase)
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
