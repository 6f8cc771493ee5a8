//! Type nodes stored by the interner

use smallvec::SmallVec;

use super::{BaseKind, TypeId};

/// One entry in the interner's node table.
///
/// Anonymous structural types are compared and hashed field-by-field so the
/// interner can unique them. Named types carry their lexical path and alias
/// another node through `children[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeNode {
    /// Base kind of this node.
    pub kind: BaseKind,
    /// Lexical name path, empty for anonymous types.
    pub name: Vec<String>,
    /// Child type ids: element for vector/dict, return-then-args for
    /// function, field types for struct, alias destination for named.
    pub children: SmallVec<[TypeId; 4]>,
    /// Field names, parallel to `children` (struct nodes only).
    pub field_names: Vec<String>,
    /// Function purity flag.
    pub pure: bool,
    /// Function returns a type decided per call site (DYN return).
    pub dyn_return: bool,
    /// Unresolved symbol text (symbol-ref nodes only).
    pub symbol: Option<String>,
}

impl TypeNode {
    /// An atomic node with no structure.
    pub fn atom(kind: BaseKind) -> Self {
        TypeNode {
            kind,
            name: Vec::new(),
            children: SmallVec::new(),
            field_names: Vec::new(),
            pure: true,
            dyn_return: false,
            symbol: None,
        }
    }

    /// `[element]`
    pub fn vector(element: TypeId) -> Self {
        let mut node = TypeNode::atom(BaseKind::Vector);
        node.children.push(element);
        node
    }

    /// `[string: value]`
    pub fn dict(value: TypeId) -> Self {
        let mut node = TypeNode::atom(BaseKind::Dict);
        node.children.push(value);
        node
    }

    /// `func ret(args...)`
    pub fn function(
        ret: TypeId,
        args: &[TypeId],
        pure: bool,
        dyn_return: bool,
    ) -> Self {
        let mut node = TypeNode::atom(BaseKind::Function);
        node.children.push(ret);
        node.children.extend(args.iter().copied());
        node.pure = pure;
        node.dyn_return = dyn_return;
        node
    }

    /// `struct { t0 n0; t1 n1; ... }`
    pub fn struct_type(
        field_names: Vec<String>,
        field_types: &[TypeId],
    ) -> Self {
        debug_assert_eq!(field_names.len(), field_types.len());
        let mut node = TypeNode::atom(BaseKind::Struct);
        node.children.extend(field_types.iter().copied());
        node.field_names = field_names;
        node
    }

    /// A named alias of `dest`. `dest` may be undefined for forward
    /// declarations.
    pub fn named(
        path: Vec<String>,
        dest: TypeId,
    ) -> Self {
        let mut node = TypeNode::atom(BaseKind::Named);
        node.name = path;
        node.children.push(dest);
        node
    }

    /// An unresolved-symbol node. These never survive program loading.
    pub fn symbol_ref(symbol: String) -> Self {
        let mut node = TypeNode::atom(BaseKind::SymbolRef);
        node.symbol = Some(symbol);
        node
    }
}

/// Structured read-only view of a node, resolved by
/// [`TypeInterner::get_variant`](super::TypeInterner::get_variant).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeVariant {
    Undefined,
    Any,
    Void,
    Bool,
    Int,
    Double,
    String,
    Json,
    Typeid,
    Struct {
        /// Field (name, type) pairs in declaration order.
        fields: Vec<(String, TypeId)>,
    },
    Vector {
        element: TypeId,
    },
    Dict {
        value: TypeId,
    },
    Function {
        ret: TypeId,
        args: Vec<TypeId>,
        pure: bool,
        dyn_return: bool,
    },
    SymbolRef {
        symbol: String,
    },
    Named {
        dest: TypeId,
    },
}
