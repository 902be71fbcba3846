//! Kind codes and scopes.
//!
//! The kind code table is part of the tagfile contract with editors, so it is
//! versioned: any change to an existing code must bump `KIND_TABLE_VERSION`,
//! which is written into every tagfile header.

use std::fmt;

use itertools::Itertools;

use crate::decl_tree::{DeclKind, DeclTree, NodeId};
use crate::file_format::tagfile::{Locator, TagEntry};
use crate::walker::Symbol;

pub const KIND_TABLE_VERSION: u32 = 1;

/// Scope chains longer than this are assumed to be cyclic front end output.
const MAX_SCOPE_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagKind {
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
    Namespace,
    Typedef,
    TypeAlias,
    Macro,
    File,
}

impl TagKind {
    pub const ALL: [TagKind; 18] = [
        TagKind::Class,
        TagKind::ClassTemplate,
        TagKind::Struct,
        TagKind::Union,
        TagKind::Enum,
        TagKind::EnumConstant,
        TagKind::Function,
        TagKind::FunctionTemplate,
        TagKind::Method,
        TagKind::Constructor,
        TagKind::Destructor,
        TagKind::Variable,
        TagKind::Field,
        TagKind::Namespace,
        TagKind::Typedef,
        TagKind::TypeAlias,
        TagKind::Macro,
        TagKind::File,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TagKind::Class => "class-def",
            TagKind::ClassTemplate => "class-template",
            TagKind::Struct => "struct-def",
            TagKind::Union => "union-def",
            TagKind::Enum => "enum-def",
            TagKind::EnumConstant => "enum-constant-def",
            TagKind::Function => "function-def",
            TagKind::FunctionTemplate => "function-template",
            TagKind::Method => "method",
            TagKind::Constructor => "ctor",
            TagKind::Destructor => "dtor",
            TagKind::Variable => "var-decl",
            TagKind::Field => "field-def",
            TagKind::Namespace => "namespace-def",
            TagKind::Typedef => "typedef-def",
            TagKind::TypeAlias => "type-alias",
            TagKind::Macro => "macro",
            TagKind::File => "file",
        }
    }

    pub fn from_code(code: &str) -> Option<TagKind> {
        TagKind::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    /// The tag kind a declaration kind is indexed as, if it is indexed at all.
    pub fn for_decl(kind: DeclKind) -> Option<TagKind> {
        Some(match kind {
            DeclKind::Class => TagKind::Class,
            DeclKind::ClassTemplate => TagKind::ClassTemplate,
            DeclKind::Struct => TagKind::Struct,
            DeclKind::Union => TagKind::Union,
            DeclKind::Enum => TagKind::Enum,
            DeclKind::EnumConstant => TagKind::EnumConstant,
            DeclKind::Function => TagKind::Function,
            DeclKind::FunctionTemplate => TagKind::FunctionTemplate,
            DeclKind::Method => TagKind::Method,
            DeclKind::Constructor => TagKind::Constructor,
            DeclKind::Destructor => TagKind::Destructor,
            DeclKind::Variable => TagKind::Variable,
            DeclKind::Field => TagKind::Field,
            DeclKind::Namespace => TagKind::Namespace,
            DeclKind::Typedef => TagKind::Typedef,
            DeclKind::TypeAlias => TagKind::TypeAlias,
            DeclKind::TranslationUnit
            | DeclKind::LinkageSpec
            | DeclKind::Parameter
            | DeclKind::UnresolvedScope
            | DeclKind::Other => return None,
        })
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.code())
    }
}

/// One enclosing named scope of a symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeSegment {
    pub kind: DeclKind,
    pub name: String,
}

/// Walk the semantic-parent chain of `node` up to the translation unit and
/// return the named scopes, outermost first.  Linkage specifications and
/// anonymous scopes are transparent.
pub fn enclosing_scope<T: DeclTree + ?Sized>(tree: &T, node: NodeId) -> Vec<ScopeSegment> {
    let mut segments = vec![];
    let mut current = tree.semantic_parent(node);
    let mut depth = 0;
    while let Some(scope) = current {
        depth += 1;
        if depth > MAX_SCOPE_DEPTH {
            warn!("Scope chain of '{}' is too deep, truncating", tree.name(node));
            break;
        }
        let kind = tree.kind(scope);
        if kind == DeclKind::TranslationUnit {
            break;
        }
        let name = tree.name(scope);
        if scope_field_key(kind).is_some() && !name.is_empty() {
            segments.push(ScopeSegment {
                kind,
                name: name.to_string(),
            });
        }
        current = tree.semantic_parent(scope);
    }
    segments.reverse();
    segments
}

/// Extra field key for a scope of the given kind, following the ctags
/// convention of naming the field after the innermost scope's kind.
fn scope_field_key(kind: DeclKind) -> Option<&'static str> {
    match kind {
        DeclKind::Namespace => Some("namespace"),
        DeclKind::Class | DeclKind::ClassTemplate => Some("class"),
        DeclKind::Struct => Some("struct"),
        DeclKind::Union => Some("union"),
        DeclKind::Enum => Some("enum"),
        DeclKind::UnresolvedScope => Some("scope"),
        _ => None,
    }
}

/// `(key, "outer::inner")` for a non-empty scope.
pub fn scope_field(scope: &[ScopeSegment]) -> Option<(&'static str, String)> {
    let innermost = scope.last()?;
    let key = scope_field_key(innermost.kind)?;
    let qualified = scope.iter().map(|segment| segment.name.as_str()).join("::");
    Some((key, qualified))
}

/// Turn a walked symbol and its locator into a tag entry.
pub fn tag_entry(symbol: &Symbol, locator: Locator) -> Option<TagEntry> {
    let kind = TagKind::for_decl(symbol.kind)?;
    let mut entry = TagEntry::new(&symbol.name, &symbol.file, locator, kind.code());
    if let Some((key, value)) = scope_field(&symbol.scope) {
        entry = entry.with_field(key, &value);
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl_tree::{DeclArena, SourceLocation};

    #[test]
    fn kind_table_is_fixed() {
        // Changing any of these requires bumping KIND_TABLE_VERSION.
        let expected = [
            (DeclKind::Class, "class-def"),
            (DeclKind::ClassTemplate, "class-template"),
            (DeclKind::Struct, "struct-def"),
            (DeclKind::Union, "union-def"),
            (DeclKind::Enum, "enum-def"),
            (DeclKind::EnumConstant, "enum-constant-def"),
            (DeclKind::Function, "function-def"),
            (DeclKind::FunctionTemplate, "function-template"),
            (DeclKind::Method, "method"),
            (DeclKind::Constructor, "ctor"),
            (DeclKind::Destructor, "dtor"),
            (DeclKind::Variable, "var-decl"),
            (DeclKind::Field, "field-def"),
            (DeclKind::Namespace, "namespace-def"),
            (DeclKind::Typedef, "typedef-def"),
            (DeclKind::TypeAlias, "type-alias"),
        ];
        for (decl, code) in expected.iter() {
            assert_eq!(TagKind::for_decl(*decl).map(TagKind::code), Some(*code), "{:?}", decl);
        }
        assert_eq!(TagKind::Macro.code(), "macro");
        assert_eq!(TagKind::File.code(), "file");
        assert_eq!(KIND_TABLE_VERSION, 1);
    }

    #[test]
    fn codes_are_unique_and_reversible() {
        for kind in TagKind::ALL.iter() {
            assert_eq!(TagKind::from_code(kind.code()), Some(*kind));
        }
        assert_eq!(TagKind::from_code("d"), None);
    }

    #[test]
    fn non_symbols_have_no_kind() {
        assert_eq!(TagKind::for_decl(DeclKind::Parameter), None);
        assert_eq!(TagKind::for_decl(DeclKind::LinkageSpec), None);
        assert_eq!(TagKind::for_decl(DeclKind::TranslationUnit), None);
    }

    #[test]
    fn scope_skips_linkage_and_anonymous_scopes() {
        let loc = |line| Some(SourceLocation::new("a.h", line, 1));
        let mut arena = DeclArena::new();
        let root = arena.root();
        let outer = arena.add(root, DeclKind::Namespace, "outer", loc(1), true);
        let anon = arena.add(outer, DeclKind::Namespace, "", loc(2), true);
        let linkage = arena.add(anon, DeclKind::LinkageSpec, "", loc(3), true);
        let class = arena.add(linkage, DeclKind::Struct, "Widget", loc(4), true);
        let field = arena.add(class, DeclKind::Field, "size", loc(5), true);

        let scope = enclosing_scope(&arena, field);
        assert_eq!(
            scope,
            vec![
                ScopeSegment { kind: DeclKind::Namespace, name: "outer".to_string() },
                ScopeSegment { kind: DeclKind::Struct, name: "Widget".to_string() },
            ]
        );
        assert_eq!(scope_field(&scope), Some(("struct", "outer::Widget".to_string())));
        assert_eq!(scope_field(&enclosing_scope(&arena, outer)), None);
    }
}
