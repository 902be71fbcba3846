//! The declaration tree as the tag engine sees it.
//!
//! Front ends hand us a tree of declarations; the engine only ever reads it
//! through the narrow `DeclTree` trait so that it can be driven by a
//! synthetic tree in tests just as well as by a real C++ parser.  `DeclArena`
//! is the in-memory implementation used by both.

use std::fmt;

use ustr::{ustr, Ustr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Declaration kinds, roughly following the cursor kinds of a C++ compiler
/// front end.  `Parameter` and `Other` exist so front ends can report
/// everything they see; the walker never indexes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeclKind {
    TranslationUnit,
    Namespace,
    /// `extern "C" { ... }`; transparent for scoping purposes.
    LinkageSpec,
    Class,
    ClassTemplate,
    Struct,
    Union,
    Enum,
    EnumConstant,
    Function,
    FunctionTemplate,
    Method,
    Constructor,
    Destructor,
    Variable,
    Field,
    Parameter,
    Typedef,
    TypeAlias,
    /// A qualifier such as the `Foo` of `void Foo::bar() {}` that the front end
    /// could not resolve to a declaration it has seen.  Never a lexical child
    /// of anything; only reachable as a semantic parent.
    UnresolvedScope,
    Other,
}

impl DeclKind {
    /// Kinds whose members the walker descends into.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            DeclKind::TranslationUnit
                | DeclKind::Namespace
                | DeclKind::LinkageSpec
                | DeclKind::Class
                | DeclKind::ClassTemplate
                | DeclKind::Struct
                | DeclKind::Union
                | DeclKind::Enum
        )
    }

    /// Kinds that own a function body.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            DeclKind::Function
                | DeclKind::FunctionTemplate
                | DeclKind::Method
                | DeclKind::Constructor
                | DeclKind::Destructor
        )
    }

    /// Kinds that can hold member functions and fields.
    pub fn is_record(self) -> bool {
        matches!(
            self,
            DeclKind::Class | DeclKind::ClassTemplate | DeclKind::Struct | DeclKind::Union
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Ustr,
    /// 1-based.
    pub line: u32,
    /// 1-based.
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: &str, line: u32, column: u32) -> SourceLocation {
        SourceLocation {
            file: ustr(file),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Read-only traversal interface over a front end's declaration tree.
pub trait DeclTree {
    fn root(&self) -> NodeId;
    /// Lexical children in declaration order.
    fn children(&self, node: NodeId) -> &[NodeId];
    fn kind(&self, node: NodeId) -> DeclKind;
    /// May be empty for anonymous declarations.
    fn name(&self, node: NodeId) -> &str;
    fn location(&self, node: NodeId) -> Option<&SourceLocation>;
    /// The enclosing scope the declaration belongs to, which for out-of-line
    /// member definitions differs from the lexical parent.
    fn semantic_parent(&self, node: NodeId) -> Option<NodeId>;
    /// Whether this is the defining declaration (a class with a body, a
    /// function with a body, ...).
    fn is_definition(&self, node: NodeId) -> bool;
}

#[derive(Clone, Debug)]
pub struct DeclNode {
    pub kind: DeclKind,
    pub name: String,
    pub location: Option<SourceLocation>,
    pub semantic_parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub is_definition: bool,
}

#[derive(Clone, Debug)]
pub struct DeclArena {
    nodes: Vec<DeclNode>,
}

impl Default for DeclArena {
    fn default() -> Self {
        DeclArena::new()
    }
}

impl DeclArena {
    /// A tree holding only the translation unit root.
    pub fn new() -> DeclArena {
        DeclArena {
            nodes: vec![DeclNode {
                kind: DeclKind::TranslationUnit,
                name: String::new(),
                location: None,
                semantic_parent: None,
                children: vec![],
                is_definition: true,
            }],
        }
    }

    /// Append a declaration as the last lexical child of `parent`.  The
    /// semantic parent starts out as the lexical parent.
    pub fn add(
        &mut self,
        parent: NodeId,
        kind: DeclKind,
        name: &str,
        location: Option<SourceLocation>,
        is_definition: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DeclNode {
            kind,
            name: name.to_string(),
            location,
            semantic_parent: Some(parent),
            children: vec![],
            is_definition,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Create a node that is nobody's lexical child, for scopes that are only
    /// known by name.
    pub fn add_detached(
        &mut self,
        kind: DeclKind,
        name: &str,
        semantic_parent: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DeclNode {
            kind,
            name: name.to_string(),
            location: None,
            semantic_parent,
            children: vec![],
            is_definition: false,
        });
        id
    }

    pub fn set_semantic_parent(&mut self, node: NodeId, parent: NodeId) {
        self.nodes[node.0].semantic_parent = Some(parent);
    }

    pub fn node(&self, id: NodeId) -> &DeclNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

impl DeclTree for DeclArena {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    fn kind(&self, node: NodeId) -> DeclKind {
        self.nodes[node.0].kind
    }

    fn name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    fn location(&self, node: NodeId) -> Option<&SourceLocation> {
        self.nodes[node.0].location.as_ref()
    }

    fn semantic_parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].semantic_parent
    }

    fn is_definition(&self, node: NodeId) -> bool {
        self.nodes[node.0].is_definition
    }
}
