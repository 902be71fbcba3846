//! Selects the indexable declarations of a translation unit.

use ustr::Ustr;

use crate::classify::{enclosing_scope, ScopeSegment};
use crate::decl_tree::{DeclKind, DeclTree, NodeId};
use crate::file_utils::is_under_any_root;

/// A declaration that made it into the index, with everything later stages
/// need to know about it.  The column distinguishes overloads declared on the
/// same line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: DeclKind,
    /// Enclosing named scopes, outermost first.
    pub scope: Vec<ScopeSegment>,
    pub file: Ustr,
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    /// Normalized system include roots.
    pub system_includes: Vec<String>,
    /// When false, declarations located under `system_includes` are skipped.
    pub include_system_includes: bool,
}

/// Visit the tree in declaration order and return the indexable symbols.
///
/// The traversal uses an explicit stack so that deeply nested scopes cannot
/// overflow the call stack.  Function bodies are never entered.
pub fn walk<T: DeclTree + ?Sized>(tree: &T, options: &WalkOptions) -> Vec<Symbol> {
    let mut symbols = vec![];
    let mut pending: Vec<NodeId> = tree.children(tree.root()).iter().rev().copied().collect();

    while let Some(node) = pending.pop() {
        if let Some(symbol) = select(tree, node, options) {
            symbols.push(symbol);
        }
        if tree.kind(node).is_container() {
            pending.extend(tree.children(node).iter().rev().copied());
        }
    }

    symbols
}

fn requires_definition(kind: DeclKind) -> bool {
    matches!(
        kind,
        DeclKind::Class
            | DeclKind::Struct
            | DeclKind::Union
            | DeclKind::Enum
            | DeclKind::EnumConstant
            | DeclKind::Namespace
            | DeclKind::Typedef
            | DeclKind::TypeAlias
            | DeclKind::Function
    )
}

/// Variables are only interesting at file, namespace or record scope; the
/// rest are locals that a front end chose to report anyway.
fn is_indexable_variable_scope<T: DeclTree + ?Sized>(tree: &T, node: NodeId) -> bool {
    let mut parent = tree.semantic_parent(node);
    while let Some(scope) = parent {
        match tree.kind(scope) {
            DeclKind::LinkageSpec => parent = tree.semantic_parent(scope),
            DeclKind::TranslationUnit | DeclKind::Namespace | DeclKind::UnresolvedScope => {
                return true;
            }
            kind => return kind.is_record(),
        }
    }
    false
}

fn select<T: DeclTree + ?Sized>(tree: &T, node: NodeId, options: &WalkOptions) -> Option<Symbol> {
    let kind = tree.kind(node);
    if crate::classify::TagKind::for_decl(kind).is_none() {
        return None;
    }
    let name = tree.name(node);
    if name.is_empty() {
        return None;
    }
    let location = tree.location(node)?;
    if !options.include_system_includes
        && is_under_any_root(&location.file, &options.system_includes)
    {
        return None;
    }
    if requires_definition(kind) && !tree.is_definition(node) {
        return None;
    }
    if kind == DeclKind::Variable && !is_indexable_variable_scope(tree, node) {
        return None;
    }

    Some(Symbol {
        name: name.to_string(),
        kind,
        scope: enclosing_scope(tree, node),
        file: location.file,
        line: location.line,
        column: location.column,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl_tree::{DeclArena, SourceLocation};

    fn loc(file: &str, line: u32) -> Option<SourceLocation> {
        Some(SourceLocation::new(file, line, 1))
    }

    fn names(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(|s| s.name.as_str()).collect()
    }

    fn default_options() -> WalkOptions {
        WalkOptions {
            system_includes: vec![],
            include_system_includes: true,
        }
    }

    #[test]
    fn emits_in_declaration_order_without_entering_bodies() {
        let mut arena = DeclArena::new();
        let root = arena.root();
        let ns = arena.add(root, DeclKind::Namespace, "app", loc("a.cpp", 1), true);
        let class = arena.add(ns, DeclKind::Class, "Window", loc("a.cpp", 2), true);
        arena.add(class, DeclKind::Field, "width", loc("a.cpp", 3), true);
        let method = arena.add(class, DeclKind::Method, "draw", loc("a.cpp", 4), true);
        arena.add(method, DeclKind::Parameter, "ctx", loc("a.cpp", 4), true);
        arena.add(method, DeclKind::Variable, "local", loc("a.cpp", 5), true);
        let function = arena.add(ns, DeclKind::Function, "run", loc("a.cpp", 8), true);
        arena.add(function, DeclKind::Variable, "counter", loc("a.cpp", 9), true);
        arena.add(ns, DeclKind::Variable, "global_count", loc("a.cpp", 11), true);

        let symbols = walk(&arena, &default_options());
        assert_eq!(names(&symbols), vec!["app", "Window", "width", "draw", "run", "global_count"]);
        assert_eq!(symbols[2].scope.len(), 2);
        assert_eq!(symbols[2].scope[1].name, "Window");
    }

    #[test]
    fn forward_declarations_and_prototypes_are_skipped() {
        let mut arena = DeclArena::new();
        let root = arena.root();
        arena.add(root, DeclKind::Class, "Forward", loc("a.h", 1), false);
        arena.add(root, DeclKind::Function, "prototype", loc("a.h", 2), false);
        let class = arena.add(root, DeclKind::Class, "Real", loc("a.h", 3), true);
        arena.add(class, DeclKind::Method, "declared", loc("a.h", 4), false);
        arena.add(root, DeclKind::Function, "defined", loc("a.h", 6), true);

        let symbols = walk(&arena, &default_options());
        assert_eq!(names(&symbols), vec!["Real", "declared", "defined"]);
    }

    #[test]
    fn anonymous_scopes_are_transparent() {
        let mut arena = DeclArena::new();
        let root = arena.root();
        let anon = arena.add(root, DeclKind::Namespace, "", loc("a.cpp", 1), true);
        let linkage = arena.add(anon, DeclKind::LinkageSpec, "", loc("a.cpp", 2), true);
        arena.add(linkage, DeclKind::Function, "c_entry", loc("a.cpp", 3), true);
        arena.add(linkage, DeclKind::Variable, "c_global", loc("a.cpp", 4), true);

        let symbols = walk(&arena, &default_options());
        assert_eq!(names(&symbols), vec!["c_entry", "c_global"]);
        assert!(symbols[0].scope.is_empty());
    }

    #[test]
    fn system_include_filter() {
        let mut arena = DeclArena::new();
        let root = arena.root();
        let std_ns = arena.add(root, DeclKind::Namespace, "std", loc("/usr/include/vector", 10), true);
        arena.add(std_ns, DeclKind::Class, "vector", loc("/usr/include/vector", 12), true);
        // A namespace reopened by user code is reported by the user's file.
        arena.add(std_ns, DeclKind::Struct, "hash_override", loc("src/hash.h", 3), true);
        arena.add(root, DeclKind::Function, "main", loc("src/main.cpp", 1), true);

        let mut options = WalkOptions {
            system_includes: vec!["/usr/include".to_string()],
            include_system_includes: true,
        };
        assert_eq!(walk(&arena, &options).len(), 4);

        options.include_system_includes = false;
        let symbols = walk(&arena, &options);
        assert_eq!(names(&symbols), vec!["hash_override", "main"]);
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let mut arena = DeclArena::new();
        let mut parent = arena.root();
        for depth in 0..10_000 {
            parent = arena.add(parent, DeclKind::Namespace, "n", loc("deep.h", depth + 1), true);
        }
        let symbols = walk(&arena, &default_options());
        assert_eq!(symbols.len(), 10_000);
    }
}
