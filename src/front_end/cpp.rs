//! A C++ front end built on tree-sitter.
//!
//! tree-sitter gives us a concrete syntax tree without running the
//! preprocessor, so `#include`s are followed by hand through the configured
//! include directories.  Conditional blocks are selected from the `#define`s
//! seen so far plus the configured defines; a condition we cannot evaluate
//! (function-like macros, macros expanding to other macros) walks every
//! remaining branch.  Qualified names such as `Foo::bar` are resolved against
//! the classes and namespaces seen so far in the translation unit.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tree_sitter::{Node, Parser};
use ustr::{ustr, Ustr};

use super::{Diagnostic, FrontEnd, Severity, TranslationUnit, VisitedFile};
use crate::config::CompileOptions;
use crate::decl_tree::{DeclArena, DeclKind, DeclTree, NodeId, SourceLocation};
use crate::errors::ParseError;
use crate::file_utils::normalize_path;

const MAX_INCLUDE_DEPTH: usize = 64;
const MAX_SYNTAX_ERRORS_PER_FILE: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct TreeSitterFrontEnd;

impl TreeSitterFrontEnd {
    /// Parse `source` as the contents of `path`.  Includes are still read
    /// from disk.
    pub fn parse_source(
        &self,
        path: &str,
        source: impl Into<Vec<u8>>,
        options: &CompileOptions,
    ) -> Result<TranslationUnit, ParseError> {
        let path = normalize_path(path);
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| ParseError::new(&path, format!("cannot load the C++ grammar: {}", e)))?;

        let mut builder = TreeBuilder::new(parser, options);
        let root = builder.arena.root();
        builder
            .add_file(&path, source.into(), root, 0)
            .map_err(|message| ParseError::new(&path, message))?;
        Ok(builder.finish(path))
    }
}

impl FrontEnd for TreeSitterFrontEnd {
    fn parse(&self, path: &str, options: &CompileOptions) -> Result<TranslationUnit, ParseError> {
        let bytes = fs::read(path).map_err(|e| ParseError::new(path, e.to_string()))?;
        self.parse_source(path, bytes, options)
    }
}

fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    let children = node.named_children(&mut cursor).collect();
    children
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children = node.children_by_field_name(field, &mut cursor).collect();
    children
}

fn is_name_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "field_identifier"
            | "type_identifier"
            | "qualified_identifier"
            | "qualified_field_identifier"
            | "qualified_type_identifier"
            | "destructor_name"
            | "operator_name"
            | "operator_cast"
            | "template_function"
            | "template_method"
    )
}

enum Declarator<'t> {
    /// The declarator declares a function; the node is its name.
    Function(Node<'t>),
    /// Anything else with a name: variables, fields, function pointers.
    Object(Node<'t>),
}

/// The wrapped declarator of pointer, reference, array, ... declarators.
fn inner_declarator(node: Node) -> Option<Node> {
    if let Some(inner) = node.child_by_field_name("declarator") {
        return Some(inner);
    }
    named_children(node)
        .into_iter()
        .find(|child| child.kind().ends_with("declarator") || is_name_kind(child.kind()))
}

fn resolve_declarator(node: Node) -> Option<Declarator> {
    let mut current = node;
    loop {
        match current.kind() {
            "function_declarator" => {
                let inner = current.child_by_field_name("declarator")?;
                if is_name_kind(inner.kind()) {
                    return Some(Declarator::Function(inner));
                }
                // `void (*callback)(int)`: a pointer, not a function.
                current = inner;
            }
            kind if is_name_kind(kind) => return Some(Declarator::Object(current)),
            "init_declarator"
            | "pointer_declarator"
            | "reference_declarator"
            | "array_declarator"
            | "parenthesized_declarator"
            | "attributed_declarator" => current = inner_declarator(current)?,
            _ => return None,
        }
    }
}

/// First `type_identifier` in pre-order, which for a typedef declarator is
/// the name being introduced.
fn first_type_identifier(node: Node) -> Option<Node> {
    let mut pending = vec![node];
    while let Some(node) = pending.pop() {
        if node.kind() == "type_identifier" {
            return Some(node);
        }
        pending.extend(named_children(node).into_iter().rev());
    }
    None
}

fn namespace_segments(node: Node) -> Vec<Node> {
    if node.kind() == "namespace_identifier" || node.kind() == "identifier" {
        return vec![node];
    }
    named_children(node)
        .into_iter()
        .flat_map(namespace_segments)
        .collect()
}

/// A possibly qualified declarator name, split into its parts.
struct DeclaratorName<'t> {
    /// Leading qualifiers; an empty string stands for the global scope of
    /// `::name`.
    qualifiers: Vec<String>,
    name: String,
    node: Node<'t>,
    /// The innermost qualifier carries template arguments, as in
    /// `Foo<T>::bar`.
    template_scope: bool,
}

/// The integer value of a preprocessor number such as `0x10`, `07` or
/// `201703L`.
fn parse_integer(text: &str) -> Option<i64> {
    let digits: String = text
        .trim()
        .trim_end_matches(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L'))
        .chars()
        .filter(|&c| c != '\'')
        .collect();
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(binary) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(binary, 2).ok()
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse().ok()
    }
}

fn binary(operator: &str, l: i64, r: i64) -> Option<i64> {
    let value = match operator {
        "&&" => (l != 0 && r != 0) as i64,
        "||" => (l != 0 || r != 0) as i64,
        "==" => (l == r) as i64,
        "!=" => (l != r) as i64,
        "<" => (l < r) as i64,
        ">" => (l > r) as i64,
        "<=" => (l <= r) as i64,
        ">=" => (l >= r) as i64,
        "+" => l.checked_add(r)?,
        "-" => l.checked_sub(r)?,
        "*" => l.checked_mul(r)?,
        "/" => l.checked_div(r)?,
        "%" => l.checked_rem(r)?,
        "&" => l & r,
        "|" => l | r,
        "^" => l ^ r,
        _ => return None,
    };
    Some(value)
}

/// The file currently being walked.
struct Source<'s> {
    path: Ustr,
    text: &'s [u8],
    depth: usize,
}

impl<'s> Source<'s> {
    /// Empty for text that is not valid UTF-8.
    fn text_of(&self, node: Node) -> &'s str {
        node.utf8_text(self.text).unwrap_or("")
    }

    fn location(&self, node: Node) -> SourceLocation {
        let position = node.start_position();
        SourceLocation {
            file: self.path,
            line: position.row as u32 + 1,
            column: position.column as u32 + 1,
        }
    }
}

struct TreeBuilder<'o> {
    parser: Parser,
    options: &'o CompileOptions,
    arena: DeclArena,
    files: Vec<VisitedFile>,
    visited: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    /// Named scopes by (owning scope, name), for resolving qualifiers.
    scopes: HashMap<(NodeId, String), NodeId>,
    /// Object-like macros with their replacement text; function-like macros
    /// map to `None`.
    macros: HashMap<String, Option<String>>,
}

impl<'o> TreeBuilder<'o> {
    fn new(parser: Parser, options: &'o CompileOptions) -> TreeBuilder<'o> {
        let mut macros = HashMap::new();
        macros.insert("__cplusplus".to_string(), Some(options.cplusplus_value().to_string()));
        for (name, value) in options.macro_definitions() {
            macros.insert(name, Some(value));
        }
        TreeBuilder {
            parser,
            options,
            arena: DeclArena::new(),
            files: vec![],
            visited: HashSet::new(),
            diagnostics: vec![],
            scopes: HashMap::new(),
            macros,
        }
    }

    fn finish(self, path: String) -> TranslationUnit {
        TranslationUnit {
            path,
            tree: Box::new(self.arena),
            files: self.files,
            diagnostics: self.diagnostics,
        }
    }

    fn add_file(
        &mut self,
        path: &str,
        text: Vec<u8>,
        parent: NodeId,
        depth: usize,
    ) -> Result<(), String> {
        let tree = self
            .parser
            .parse(&text, None)
            .ok_or_else(|| "the parser produced no syntax tree".to_string())?;
        self.visited.insert(path.to_string());
        let index = self.files.len();
        self.files.push(VisitedFile {
            path: path.to_string(),
            text: None,
        });

        let source = Source {
            path: ustr(path),
            text: &text,
            depth,
        };
        let root = tree.root_node();
        if root.has_error() {
            self.report_syntax_errors(root, &source);
        }
        self.visit_children(root, parent, &source);

        self.files[index].text = Some(text);
        Ok(())
    }

    fn report_syntax_errors(&mut self, root: Node, source: &Source) {
        let mut found = 0;
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            if node.is_error() || node.is_missing() {
                if found < MAX_SYNTAX_ERRORS_PER_FILE {
                    let message = if node.is_missing() {
                        format!("missing '{}'", node.kind())
                    } else {
                        "syntax error".to_string()
                    };
                    self.diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        location: source.location(node),
                        message,
                    });
                }
                found += 1;
                continue;
            }
            if node.has_error() {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                pending.extend(children.into_iter().rev());
            }
        }
        if found > MAX_SYNTAX_ERRORS_PER_FILE {
            debug!("{} more syntax errors in {}", found - MAX_SYNTAX_ERRORS_PER_FILE, source.path);
        }
    }

    fn warn_at(&mut self, source: &Source, node: Node, message: String) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            location: source.location(node),
            message,
        });
    }

    fn visit_children(&mut self, node: Node, parent: NodeId, source: &Source) {
        for child in named_children(node) {
            self.visit(child, parent, source, false);
        }
    }

    fn visit(&mut self, node: Node, parent: NodeId, source: &Source, template: bool) {
        match node.kind() {
            "namespace_definition" => self.visit_namespace(node, parent, source),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.visit_record(node, parent, source, template);
            }
            "enum_specifier" => self.visit_enum(node, parent, source),
            "function_definition" => {
                if let Some(Declarator::Function(name)) =
                    node.child_by_field_name("declarator").and_then(resolve_declarator)
                {
                    self.add_function(name, parent, source, template, true);
                }
            }
            "declaration" | "field_declaration" => {
                self.visit_declaration(node, parent, source, template);
            }
            "type_definition" => self.visit_typedef(node, parent, source),
            "alias_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let text = source.text_of(name);
                    self.arena
                        .add(parent, DeclKind::TypeAlias, text, Some(source.location(name)), true);
                }
            }
            "template_declaration" => {
                for child in named_children(node) {
                    if child.kind() != "template_parameter_list" {
                        self.visit(child, parent, source, true);
                    }
                }
            }
            "linkage_specification" => {
                let linkage = self
                    .arena
                    .add(parent, DeclKind::LinkageSpec, "", Some(source.location(node)), true);
                if let Some(body) = node.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.visit_children(body, linkage, source);
                    } else {
                        self.visit(body, linkage, source, false);
                    }
                }
            }
            "preproc_include" => self.visit_include(node, parent, source),
            "preproc_def" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let value = node
                        .child_by_field_name("value")
                        .map_or("", |value| source.text_of(value).trim());
                    self.macros
                        .insert(source.text_of(name).to_string(), Some(value.to_string()));
                }
            }
            "preproc_function_def" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.macros.insert(source.text_of(name).to_string(), None);
                }
            }
            "preproc_call" => {
                let directive = node.child_by_field_name("directive").map(|d| source.text_of(d));
                if directive == Some("#undef") {
                    let argument = node
                        .child_by_field_name("argument")
                        .map_or("", |a| source.text_of(a));
                    if let Some(name) = argument.split_whitespace().next() {
                        self.macros.remove(name);
                    }
                }
            }
            "preproc_if" | "preproc_ifdef" => self.visit_conditional(node, parent, source),
            "declaration_list" | "field_declaration_list" => {
                self.visit_children(node, parent, source);
            }
            _ => {}
        }
    }

    /// Walk the branches of an `#if`/`#ifdef` chain that the known macros
    /// select.  Once a condition cannot be evaluated, every remaining
    /// branch is walked.
    fn visit_conditional(&mut self, node: Node, parent: NodeId, source: &Source) {
        let mut branch = Some(node);
        let mut undecided = false;
        while let Some(current) = branch {
            let taken = if undecided {
                None
            } else {
                self.branch_condition(current, source)
            };
            match taken {
                Some(true) => {
                    self.visit_branch(current, parent, source);
                    return;
                }
                Some(false) => {}
                None => {
                    undecided = true;
                    self.visit_branch(current, parent, source);
                }
            }
            branch = current.child_by_field_name("alternative");
        }
    }

    fn visit_branch(&mut self, node: Node, parent: NodeId, source: &Source) {
        let header: Vec<Node> = ["name", "condition", "alternative"]
            .iter()
            .filter_map(|field| node.child_by_field_name(field))
            .collect();
        for child in named_children(node) {
            if !header.contains(&child) {
                self.visit(child, parent, source, false);
            }
        }
    }

    fn branch_condition(&self, node: Node, source: &Source) -> Option<bool> {
        match node.kind() {
            "preproc_else" => Some(true),
            "preproc_ifdef" | "preproc_elifdef" => {
                let name = source.text_of(node.child_by_field_name("name")?);
                let negated = node.child(0).map_or(false, |d| d.kind().ends_with("ndef"));
                Some(self.macros.contains_key(name) != negated)
            }
            "preproc_if" | "preproc_elif" => {
                let condition = node.child_by_field_name("condition")?;
                self.evaluate(condition, source).map(|value| value != 0)
            }
            _ => None,
        }
    }

    /// The value of a `#if` expression, or `None` if it depends on
    /// something we do not model.
    fn evaluate(&self, node: Node, source: &Source) -> Option<i64> {
        match node.kind() {
            "number_literal" => parse_integer(source.text_of(node)),
            "true" => Some(1),
            "false" => Some(0),
            // Identifiers that are not macros are 0, as in the preprocessor.
            "identifier" => match self.macros.get(source.text_of(node)) {
                Some(Some(value)) => parse_integer(value),
                Some(None) => None,
                None => Some(0),
            },
            "preproc_defined" => {
                let name = named_children(node)
                    .into_iter()
                    .find(|child| child.kind() == "identifier")?;
                Some(self.macros.contains_key(source.text_of(name)) as i64)
            }
            "parenthesized_expression" => {
                let inner = named_children(node).into_iter().find(|c| c.kind() != "comment")?;
                self.evaluate(inner, source)
            }
            "unary_expression" => {
                let operator = node.child_by_field_name("operator")?;
                let value = self.evaluate(node.child_by_field_name("argument")?, source)?;
                match operator.kind() {
                    "!" => Some((value == 0) as i64),
                    "-" => value.checked_neg(),
                    "+" => Some(value),
                    "~" => Some(!value),
                    _ => None,
                }
            }
            "binary_expression" => {
                let operator = node.child_by_field_name("operator")?.kind();
                let left = self.evaluate(node.child_by_field_name("left")?, source);
                let right = self.evaluate(node.child_by_field_name("right")?, source);
                match (operator, left, right) {
                    ("&&", Some(0), _) | ("&&", _, Some(0)) => Some(0),
                    ("||", Some(l), _) | ("||", _, Some(l)) if l != 0 => Some(1),
                    (_, Some(l), Some(r)) => binary(operator, l, r),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn declarator_name<'t>(&self, node: Node<'t>, source: &Source) -> Option<DeclaratorName<'t>> {
        match node.kind() {
            "qualified_identifier" | "qualified_field_identifier" | "qualified_type_identifier" => {
                let mut inner = self.declarator_name(node.child_by_field_name("name")?, source)?;
                let (segment, is_template) = match node.child_by_field_name("scope") {
                    Some(scope) if scope.kind() == "template_type" => {
                        (source.text_of(scope.child_by_field_name("name")?).to_string(), true)
                    }
                    Some(scope) => (source.text_of(scope).to_string(), false),
                    None => (String::new(), false),
                };
                if inner.qualifiers.is_empty() {
                    inner.template_scope = is_template;
                }
                inner.qualifiers.insert(0, segment);
                Some(inner)
            }
            "template_function" | "template_method" | "template_type" => {
                self.declarator_name(node.child_by_field_name("name")?, source)
            }
            "destructor_name" => Some(DeclaratorName {
                qualifiers: vec![],
                name: source.text_of(node).split_whitespace().collect(),
                node,
                template_scope: false,
            }),
            kind if is_name_kind(kind) || kind == "namespace_identifier" => Some(DeclaratorName {
                qualifiers: vec![],
                name: source.text_of(node).split_whitespace().collect::<Vec<_>>().join(" "),
                node,
                template_scope: false,
            }),
            _ => None,
        }
    }

    /// Skip scopes that do not introduce a name of their own.
    fn lookup_owner(&self, mut scope: NodeId) -> NodeId {
        loop {
            let transparent = match self.arena.kind(scope) {
                DeclKind::LinkageSpec => true,
                DeclKind::Namespace => self.arena.name(scope).is_empty(),
                _ => false,
            };
            match self.arena.semantic_parent(scope) {
                Some(parent) if transparent => scope = parent,
                _ => return scope,
            }
        }
    }

    fn lookup_visible(&self, name: &str, context: NodeId) -> Option<NodeId> {
        let mut scope = Some(self.lookup_owner(context));
        while let Some(current) = scope {
            if let Some(found) = self.scopes.get(&(current, name.to_string())) {
                return Some(*found);
            }
            scope = self
                .arena
                .semantic_parent(current)
                .map(|parent| self.lookup_owner(parent));
        }
        None
    }

    fn unresolved(&mut self, owner: NodeId, name: &str) -> NodeId {
        let id = self
            .arena
            .add_detached(DeclKind::UnresolvedScope, name, Some(owner));
        self.scopes.insert((owner, name.to_string()), id);
        id
    }

    /// The scope named by `qualifiers` as seen from `context`.  Qualifiers
    /// that name nothing we have seen become unresolved scopes.
    fn resolve_scope(&mut self, qualifiers: &[String], context: NodeId) -> NodeId {
        let (first, rest) = match qualifiers.split_first() {
            Some(split) => split,
            None => return context,
        };
        let mut current = if first.is_empty() {
            self.arena.root()
        } else {
            match self.lookup_visible(first, context) {
                Some(found) => found,
                None => {
                    let owner = self.lookup_owner(context);
                    self.unresolved(owner, first)
                }
            }
        };
        for segment in rest {
            current = match self.scopes.get(&(current, segment.clone())) {
                Some(found) => *found,
                None => self.unresolved(current, segment),
            };
        }
        current
    }

    fn register_scope(&mut self, id: NodeId, replace: bool) {
        let name = self.arena.name(id).to_string();
        if name.is_empty() {
            return;
        }
        let owner = match self.arena.semantic_parent(id) {
            Some(parent) => self.lookup_owner(parent),
            None => return,
        };
        let key = (owner, name);
        let keep_existing = match self.scopes.get(&key) {
            Some(existing) => !replace && self.arena.kind(*existing) != DeclKind::UnresolvedScope,
            None => false,
        };
        if !keep_existing {
            self.scopes.insert(key, id);
        }
    }

    fn visit_namespace(&mut self, node: Node, parent: NodeId, source: &Source) {
        let mut scope = parent;
        match node.child_by_field_name("name") {
            Some(name) => {
                // `namespace a::b { }` opens one namespace per segment.
                for segment in namespace_segments(name) {
                    let text = source.text_of(segment);
                    let location = Some(source.location(segment));
                    scope = self.arena.add(scope, DeclKind::Namespace, text, location, true);
                    self.register_scope(scope, false);
                }
            }
            None => {
                scope = self
                    .arena
                    .add(parent, DeclKind::Namespace, "", Some(source.location(node)), true);
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, scope, source);
        }
    }

    fn visit_record(
        &mut self,
        node: Node,
        parent: NodeId,
        source: &Source,
        template: bool,
    ) -> Option<NodeId> {
        let body = node.child_by_field_name("body");
        let name = node
            .child_by_field_name("name")
            .and_then(|name| self.declarator_name(name, source));
        if name.is_none() && body.is_none() {
            return None;
        }

        let kind = match node.kind() {
            _ if template => DeclKind::ClassTemplate,
            "struct_specifier" => DeclKind::Struct,
            "union_specifier" => DeclKind::Union,
            _ => DeclKind::Class,
        };
        let (text, location) = match &name {
            Some(name) => (name.name.as_str(), source.location(name.node)),
            None => ("", source.location(node)),
        };
        let id = self.arena.add(parent, kind, text, Some(location), body.is_some());
        if let Some(name) = &name {
            if !name.qualifiers.is_empty() {
                let scope = self.resolve_scope(&name.qualifiers, parent);
                self.arena.set_semantic_parent(id, scope);
            }
        }

        if let Some(body) = body {
            self.register_scope(id, true);
            self.visit_children(body, id, source);
        }
        Some(id)
    }

    fn visit_enum(&mut self, node: Node, parent: NodeId, source: &Source) {
        let body = node.child_by_field_name("body");
        let name = node.child_by_field_name("name");
        if name.is_none() && body.is_none() {
            return;
        }
        let (text, location) = match name {
            Some(name) => (source.text_of(name), source.location(name)),
            None => ("", source.location(node)),
        };
        let id = self.arena.add(parent, DeclKind::Enum, text, Some(location), body.is_some());
        if let Some(body) = body {
            self.register_scope(id, true);
            for enumerator in named_children(body) {
                if enumerator.kind() != "enumerator" {
                    continue;
                }
                if let Some(name) = enumerator.child_by_field_name("name") {
                    self.arena.add(
                        id,
                        DeclKind::EnumConstant,
                        source.text_of(name),
                        Some(source.location(name)),
                        true,
                    );
                }
            }
        }
    }

    fn function_kind(&self, name: &str, scope: NodeId, template: bool) -> DeclKind {
        if template {
            return DeclKind::FunctionTemplate;
        }
        let owner = self.lookup_owner(scope);
        let owner_kind = self.arena.kind(owner);
        if !owner_kind.is_record() && owner_kind != DeclKind::UnresolvedScope {
            return DeclKind::Function;
        }
        if name.starts_with('~') {
            DeclKind::Destructor
        } else if name == self.arena.name(owner) {
            DeclKind::Constructor
        } else {
            DeclKind::Method
        }
    }

    fn add_function(
        &mut self,
        name_node: Node,
        parent: NodeId,
        source: &Source,
        template: bool,
        is_definition: bool,
    ) {
        let name = match self.declarator_name(name_node, source) {
            Some(name) => name,
            None => return,
        };
        let scope = self.resolve_scope(&name.qualifiers, parent);
        // `template <class T> void Foo<T>::bar() {}` is a plain member of a
        // class template.
        let template = template && !name.template_scope;
        let kind = self.function_kind(&name.name, scope, template);
        let id = self.arena.add(
            parent,
            kind,
            &name.name,
            Some(source.location(name.node)),
            is_definition,
        );
        if scope != parent {
            self.arena.set_semantic_parent(id, scope);
        }
    }

    fn add_object(&mut self, name_node: Node, parent: NodeId, source: &Source, is_field: bool) {
        let name = match self.declarator_name(name_node, source) {
            Some(name) => name,
            None => return,
        };
        let scope = self.resolve_scope(&name.qualifiers, parent);
        let kind = if is_field { DeclKind::Field } else { DeclKind::Variable };
        let id = self
            .arena
            .add(parent, kind, &name.name, Some(source.location(name.node)), true);
        if scope != parent {
            self.arena.set_semantic_parent(id, scope);
        }
    }

    fn visit_declaration(&mut self, node: Node, parent: NodeId, source: &Source, template: bool) {
        let declarators = field_children(node, "declarator");

        if let Some(ty) = node.child_by_field_name("type") {
            if ty.child_by_field_name("body").is_some() {
                match ty.kind() {
                    "class_specifier" | "struct_specifier" | "union_specifier" => {
                        self.visit_record(ty, parent, source, template && declarators.is_empty());
                    }
                    "enum_specifier" => self.visit_enum(ty, parent, source),
                    _ => {}
                }
            }
        }

        let is_static = named_children(node).iter().any(|child| {
            child.kind() == "storage_class_specifier" && source.text_of(*child) == "static"
        });
        let in_record = self.arena.kind(parent).is_record();

        for declarator in declarators {
            match resolve_declarator(declarator) {
                Some(Declarator::Function(name)) => {
                    self.add_function(name, parent, source, template, false);
                }
                Some(Declarator::Object(name)) => {
                    self.add_object(name, parent, source, in_record && !is_static);
                }
                None => {}
            }
        }
    }

    fn visit_typedef(&mut self, node: Node, parent: NodeId, source: &Source) {
        if let Some(ty) = node.child_by_field_name("type") {
            if ty.child_by_field_name("body").is_some() {
                match ty.kind() {
                    "class_specifier" | "struct_specifier" | "union_specifier" => {
                        self.visit_record(ty, parent, source, false);
                    }
                    "enum_specifier" => self.visit_enum(ty, parent, source),
                    _ => {}
                }
            }
        }
        for declarator in field_children(node, "declarator") {
            if let Some(name) = first_type_identifier(declarator) {
                self.arena.add(
                    parent,
                    DeclKind::Typedef,
                    source.text_of(name),
                    Some(source.location(name)),
                    true,
                );
            }
        }
    }

    fn resolve_include(&self, name: &str, quoted: bool, including: &str) -> Option<String> {
        let mut candidates = vec![];
        if quoted {
            if let Some(dir) = Path::new(including).parent() {
                candidates.push(dir.join(name));
            }
        }
        candidates.extend(self.options.include_dirs().map(|dir| Path::new(dir).join(name)));
        candidates
            .into_iter()
            .map(|candidate| normalize_path(&candidate.to_string_lossy()))
            .find(|candidate| Path::new(candidate).is_file())
    }

    fn visit_include(&mut self, node: Node, parent: NodeId, source: &Source) {
        let path = match node.child_by_field_name("path") {
            Some(path) => path,
            None => return,
        };
        let raw = source.text_of(path);
        let (name, quoted) = match path.kind() {
            "string_literal" => (raw.trim_matches('"'), true),
            "system_lib_string" => (raw.trim_start_matches('<').trim_end_matches('>'), false),
            // `#include MACRO` needs the preprocessor.
            _ => return,
        };
        let resolved = match self.resolve_include(name, quoted, &source.path) {
            Some(resolved) => resolved,
            None => {
                trace!("{}: include '{}' not found", source.location(node), name);
                return;
            }
        };
        if self.visited.contains(&resolved) {
            return;
        }
        if source.depth >= MAX_INCLUDE_DEPTH {
            self.warn_at(source, node, format!("include depth limit reached at '{}'", resolved));
            return;
        }
        let result = fs::read(&resolved)
            .map_err(|e| e.to_string())
            .and_then(|text| self.add_file(&resolved, text, parent, source.depth + 1));
        if let Err(message) = result {
            self.warn_at(source, node, format!("cannot parse '{}': {}", resolved, message));
        }
    }
}
