//! The type interner
//!
//! Uniques every type used at runtime and hands out dense [`TypeId`]s. The
//! node table is append-only except for the alias destination of named
//! nodes, which supports forward declaration of recursive types.

use hashbrown::HashMap;
use indexmap::IndexMap;

use super::node::{TypeNode, TypeVariant};
use super::{BaseKind, TypeId, RESERVED_TYPE_COUNT};

/// Interner for runtime types.
///
/// The first [`RESERVED_TYPE_COUNT`] slots hold the atomic kinds so their
/// ids are compile-time constants. Misuse (duplicate named path, updating a
/// non-named node, unknown lookup) is a programmer error and panics; type
/// operations never produce user-level errors.
#[derive(Debug)]
pub struct TypeInterner {
    nodes: Vec<TypeNode>,
    /// Structural lookup for anonymous nodes.
    anonymous: HashMap<TypeNode, TypeId>,
    /// Name-path lookup for named nodes, in declaration order.
    named: IndexMap<Vec<String>, TypeId>,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    /// Create an interner seeded with the fifteen reserved slots.
    pub fn new() -> Self {
        let mut interner = TypeInterner {
            nodes: Vec::with_capacity(64),
            anonymous: HashMap::new(),
            named: IndexMap::new(),
        };
        let reserved = [
            BaseKind::Undefined,
            BaseKind::Any,
            BaseKind::Void,
            BaseKind::Bool,
            BaseKind::Int,
            BaseKind::Double,
            BaseKind::String,
            BaseKind::Json,
            BaseKind::Typeid,
            BaseKind::Struct,
            BaseKind::Vector,
            BaseKind::Dict,
            BaseKind::Function,
            BaseKind::SymbolRef,
            BaseKind::Named,
        ];
        for (index, kind) in reserved.iter().enumerate() {
            let node = TypeNode::atom(*kind);
            let id = TypeId::pack(*kind, index);
            // Only the true atomic kinds take part in structural lookup;
            // slots 9..14 are placeholders and never match a real node.
            if index < BaseKind::Struct as usize {
                interner.anonymous.insert(node.clone(), id);
            }
            interner.nodes.push(node);
        }
        debug_assert_eq!(interner.nodes.len(), RESERVED_TYPE_COUNT);
        interner
    }

    /// Number of interned nodes.
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Intern an anonymous structural type.
    ///
    /// Idempotent: structurally equal nodes always yield the same id. Every
    /// child must already be interned, which keeps child ids numerically
    /// below their parent.
    pub fn intern_anonymous(
        &mut self,
        node: TypeNode,
    ) -> TypeId {
        assert!(node.name.is_empty(), "named types go through declare_named");
        assert_ne!(node.kind, BaseKind::Named);
        for child in &node.children {
            assert!(
                child.index() < self.nodes.len(),
                "child type interned after its parent"
            );
        }
        if let Some(id) = self.anonymous.get(&node) {
            return *id;
        }
        let id = TypeId::pack(node.kind, self.nodes.len());
        self.anonymous.insert(node.clone(), id);
        self.nodes.push(node);
        id
    }

    /// Declare a named type. `body` may be [`TypeId::UNDEFINED`] as a
    /// forward-declaration placeholder.
    pub fn declare_named(
        &mut self,
        path: Vec<String>,
        body: TypeId,
    ) -> TypeId {
        assert!(!path.is_empty());
        assert!(
            !self.named.contains_key(&path),
            "duplicate named type: {}",
            path.join(".")
        );
        let id = TypeId::pack(BaseKind::Named, self.nodes.len());
        self.nodes.push(TypeNode::named(path.clone(), body));
        self.named.insert(path, id);
        id
    }

    /// Fill in the body of a previously declared named type.
    pub fn update_named(
        &mut self,
        id: TypeId,
        body: TypeId,
    ) {
        let node = &mut self.nodes[id.index()];
        assert_eq!(node.kind, BaseKind::Named, "update_named on non-named id");
        node.children[0] = body;
    }

    /// Look up a named type by path. Panics on unknown paths.
    pub fn lookup_by_name(
        &self,
        path: &[String],
    ) -> TypeId {
        self.try_lookup_by_name(path)
            .unwrap_or_else(|| panic!("unknown named type: {}", path.join(".")))
    }

    /// Non-panicking variant of [`lookup_by_name`](Self::lookup_by_name).
    pub fn try_lookup_by_name(
        &self,
        path: &[String],
    ) -> Option<TypeId> {
        self.named.get(path).copied()
    }

    /// Unwrap named aliases until a non-named node is reached.
    pub fn peek(
        &self,
        id: TypeId,
    ) -> TypeId {
        let mut current = id;
        loop {
            let node = self.get_node(current);
            if node.kind == BaseKind::Named {
                current = node.children[0];
            } else {
                return current;
            }
        }
    }

    /// Read-only access to a node.
    pub fn get_node(
        &self,
        id: TypeId,
    ) -> &TypeNode {
        &self.nodes[id.index()]
    }

    /// Rebuild a packed id from a bare interner index.
    ///
    /// Instruction immediates carry the index, not the packed form.
    pub fn type_at_index(
        &self,
        index: usize,
    ) -> TypeId {
        TypeId::pack(self.nodes[index].kind, index)
    }

    /// Structured view of a node.
    pub fn get_variant(
        &self,
        id: TypeId,
    ) -> TypeVariant {
        let node = self.get_node(id);
        match node.kind {
            BaseKind::Undefined => TypeVariant::Undefined,
            BaseKind::Any => TypeVariant::Any,
            BaseKind::Void => TypeVariant::Void,
            BaseKind::Bool => TypeVariant::Bool,
            BaseKind::Int => TypeVariant::Int,
            BaseKind::Double => TypeVariant::Double,
            BaseKind::String => TypeVariant::String,
            BaseKind::Json => TypeVariant::Json,
            BaseKind::Typeid => TypeVariant::Typeid,
            BaseKind::Struct => TypeVariant::Struct {
                fields: node
                    .field_names
                    .iter()
                    .cloned()
                    .zip(node.children.iter().copied())
                    .collect(),
            },
            BaseKind::Vector => TypeVariant::Vector {
                element: node.children[0],
            },
            BaseKind::Dict => TypeVariant::Dict {
                value: node.children[0],
            },
            BaseKind::Function => TypeVariant::Function {
                ret: node.children[0],
                args: node.children[1..].to_vec(),
                pure: node.pure,
                dyn_return: node.dyn_return,
            },
            BaseKind::SymbolRef => TypeVariant::SymbolRef {
                symbol: node.symbol.clone().unwrap_or_default(),
            },
            BaseKind::Named => TypeVariant::Named {
                dest: node.children[0],
            },
        }
    }

    /// Does a value of this type own a heap allocation?
    pub fn is_rc(
        &self,
        id: TypeId,
    ) -> bool {
        matches!(
            self.get_node(self.peek(id)).kind,
            BaseKind::String
                | BaseKind::Json
                | BaseKind::Struct
                | BaseKind::Vector
                | BaseKind::Dict
        )
    }

    /// Compact textual form of a type, as used by `typeof` and `to_string`.
    pub fn type_to_string(
        &self,
        id: TypeId,
    ) -> String {
        let node = self.get_node(id);
        match node.kind {
            BaseKind::Undefined => "undef".to_string(),
            BaseKind::Any => "any".to_string(),
            BaseKind::Void => "void".to_string(),
            BaseKind::Bool => "bool".to_string(),
            BaseKind::Int => "int".to_string(),
            BaseKind::Double => "double".to_string(),
            BaseKind::String => "string".to_string(),
            BaseKind::Json => "json".to_string(),
            BaseKind::Typeid => "typeid".to_string(),
            BaseKind::Struct => {
                let mut out = String::from("struct {");
                for (name, child) in node.field_names.iter().zip(node.children.iter()) {
                    out.push_str(&self.type_to_string(*child));
                    out.push(' ');
                    out.push_str(name);
                    out.push(';');
                }
                out.push('}');
                out
            }
            BaseKind::Vector => format!("[{}]", self.type_to_string(node.children[0])),
            BaseKind::Dict => format!("[string:{}]", self.type_to_string(node.children[0])),
            BaseKind::Function => {
                let args: Vec<String> = node.children[1..]
                    .iter()
                    .map(|a| self.type_to_string(*a))
                    .collect();
                let mut out = format!(
                    "func {}({})",
                    self.type_to_string(node.children[0]),
                    args.join(",")
                );
                if !node.pure {
                    out.push_str(" impure");
                }
                out
            }
            BaseKind::SymbolRef => {
                format!("symbol-ref({})", node.symbol.as_deref().unwrap_or(""))
            }
            BaseKind::Named => node.name.join("."),
        }
    }
}
