//! Built-in intrinsics
//!
//! Every intrinsic is a host function registered in the function link
//! table under a stable integer id (1000..1099). Its Floyd-level type is
//! fixed here and used by the compiler to type call sites; dynamic (`any`)
//! parameters arrive through the two-word calling convention.
//!
//! Ids 1005 and 1014..1016 belong to the out-of-scope OS bindings and stay
//! reserved.

pub mod basics;
pub mod collections;
pub mod higher_order;
pub mod json;

use hashbrown::HashMap;

use crate::types::{TypeId, TypeInterner, TypeNode};
use crate::vm::interpreter::HostFn;

pub const ID_PRINT: i32 = 1000;
pub const ID_ASSERT: i32 = 1001;
pub const ID_TO_STRING: i32 = 1002;
pub const ID_TO_PRETTY_STRING: i32 = 1003;
pub const ID_TYPEOF: i32 = 1004;
pub const ID_UPDATE: i32 = 1006;
pub const ID_SIZE: i32 = 1007;
pub const ID_FIND: i32 = 1008;
pub const ID_EXISTS: i32 = 1009;
pub const ID_ERASE: i32 = 1010;
pub const ID_PUSH_BACK: i32 = 1011;
pub const ID_SUBSET: i32 = 1012;
pub const ID_REPLACE: i32 = 1013;
pub const ID_PARSE_JSON_SCRIPT: i32 = 1017;
pub const ID_GENERATE_JSON_SCRIPT: i32 = 1018;
pub const ID_TO_JSON: i32 = 1019;
pub const ID_FROM_JSON: i32 = 1020;
pub const ID_GET_JSON_TYPE: i32 = 1021;
pub const ID_MAP: i32 = 1030;
pub const ID_MAP_STRING: i32 = 1031;
pub const ID_MAP_DAG: i32 = 1032;
pub const ID_FILTER: i32 = 1033;
pub const ID_REDUCE: i32 = 1034;
pub const ID_STABLE_SORT: i32 = 1035;
pub const ID_GET_KEYS: i32 = 1036;

/// One row of the intrinsic signature table.
#[derive(Debug, Clone)]
pub struct IntrinsicSignature {
    pub id: i32,
    pub name: &'static str,
    pub function_type: TypeId,
}

/// The host-function dispatch table.
pub fn host_functions() -> HashMap<i32, HostFn> {
    let rows: &[(i32, HostFn)] = &[
        (ID_PRINT, basics::print),
        (ID_ASSERT, basics::assert_),
        (ID_TO_STRING, basics::to_string),
        (ID_TO_PRETTY_STRING, basics::to_pretty_string),
        (ID_TYPEOF, basics::type_of),
        (ID_UPDATE, collections::update),
        (ID_SIZE, collections::size),
        (ID_FIND, collections::find),
        (ID_EXISTS, collections::exists),
        (ID_ERASE, collections::erase),
        (ID_PUSH_BACK, collections::push_back),
        (ID_SUBSET, collections::subset),
        (ID_REPLACE, collections::replace),
        (ID_GET_KEYS, collections::get_keys),
        (ID_PARSE_JSON_SCRIPT, json::parse_json_script),
        (ID_GENERATE_JSON_SCRIPT, json::generate_json_script),
        (ID_TO_JSON, json::to_json),
        (ID_FROM_JSON, json::from_json),
        (ID_GET_JSON_TYPE, json::get_json_type),
        (ID_MAP, higher_order::map),
        (ID_MAP_STRING, higher_order::map_string),
        (ID_MAP_DAG, higher_order::map_dag),
        (ID_FILTER, higher_order::filter),
        (ID_REDUCE, higher_order::reduce),
        (ID_STABLE_SORT, higher_order::stable_sort),
    ];
    rows.iter().copied().collect()
}

/// Intern the Floyd-level types of all intrinsics and return the table.
///
/// The signatures mirror the original catalogue: `any` stands for a DYN
/// parameter, and DYN-returning intrinsics set the dynamic-return flag.
pub fn signatures(interner: &mut TypeInterner) -> Vec<IntrinsicSignature> {
    let any = TypeId::ANY;
    let void = TypeId::VOID;
    let int = TypeId::INT;
    let bool_ = TypeId::BOOL;
    let string = TypeId::STRING;
    let json = TypeId::JSON;
    let type_id = TypeId::TYPEID;

    let mut rows = Vec::new();
    let mut sig = |interner: &mut TypeInterner,
                   id: i32,
                   name: &'static str,
                   ret: TypeId,
                   args: &[TypeId],
                   dyn_return: bool| {
        let function_type =
            interner.intern_anonymous(TypeNode::function(ret, args, false, dyn_return));
        rows.push(IntrinsicSignature {
            id,
            name,
            function_type,
        });
    };

    sig(interner, ID_PRINT, "print", void, &[any], false);
    sig(interner, ID_ASSERT, "assert", void, &[any], false);
    sig(interner, ID_TO_STRING, "to_string", string, &[any], false);
    sig(
        interner,
        ID_TO_PRETTY_STRING,
        "to_pretty_string",
        string,
        &[any],
        false,
    );
    sig(interner, ID_TYPEOF, "typeof", type_id, &[any], false);
    sig(interner, ID_UPDATE, "update", any, &[any, any, any], true);
    sig(interner, ID_SIZE, "size", int, &[any], false);
    sig(interner, ID_FIND, "find", int, &[any, any], false);
    sig(interner, ID_EXISTS, "exists", bool_, &[any, any], false);
    sig(interner, ID_ERASE, "erase", any, &[any, any], true);
    sig(interner, ID_PUSH_BACK, "push_back", any, &[any, any], true);
    sig(interner, ID_SUBSET, "subset", any, &[any, any, any], true);
    sig(
        interner,
        ID_REPLACE,
        "replace",
        any,
        &[any, any, any, any],
        true,
    );
    sig(
        interner,
        ID_PARSE_JSON_SCRIPT,
        "parse_json_script",
        json,
        &[string],
        false,
    );
    sig(
        interner,
        ID_GENERATE_JSON_SCRIPT,
        "generate_json_script",
        string,
        &[json],
        false,
    );
    sig(interner, ID_TO_JSON, "to_json", json, &[any], false);
    sig(
        interner,
        ID_FROM_JSON,
        "from_json",
        any,
        &[json, type_id],
        true,
    );
    sig(
        interner,
        ID_GET_JSON_TYPE,
        "get_json_type",
        int,
        &[json],
        false,
    );
    sig(interner, ID_MAP, "map", any, &[any, any, any], true);
    sig(
        interner,
        ID_MAP_STRING,
        "map_string",
        string,
        &[string, any, any],
        false,
    );
    sig(
        interner,
        ID_MAP_DAG,
        "map_dag",
        any,
        &[any, any, any, any],
        true,
    );
    sig(interner, ID_FILTER, "filter", any, &[any, any, any], true);
    sig(
        interner,
        ID_REDUCE,
        "reduce",
        any,
        &[any, any, any, any],
        true,
    );
    sig(
        interner,
        ID_STABLE_SORT,
        "stable_sort",
        any,
        &[any, any, any],
        true,
    );
    sig(interner, ID_GET_KEYS, "get_keys", any, &[any], true);
    rows
}
