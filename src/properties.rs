//! Property dictionary (§6, §4.9): an introspection dump of an element's
//! fields, plus `match_properties` for filtering a tree by a partial
//! dictionary — the Rust counterpart of `IOHIDElementPrivate::createProperties`
//! / `matchProperties`.

use std::collections::BTreeMap;

use crate::element::{Cookie, Element, ElementKind, ElementType};
use crate::descriptor::MainFlags;
use crate::tree::ElementTree;

/// One property value. `Children` is only produced for collections under
/// the `max_children` threshold; oversized sub-trees get `ElidedChildren`
/// instead (§4.4's "child limit exceeded" recoverable error path).
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    UInt(u64),
    Int(i64),
    Bool(bool),
    Children(Vec<PropertyMap>),
    ElidedChildren(String),
}

/// A single element's property dictionary, keyed by the names in §6's
/// table.
pub type PropertyMap = BTreeMap<&'static str, PropertyValue>;

fn element_type_code(t: ElementType) -> u64 {
    match t {
        ElementType::Input => 1,
        ElementType::Output => 2,
        ElementType::Feature => 3,
        ElementType::Collection => 513,
        ElementType::InputNull => 4,
    }
}

/// Build the property dictionary for `cookie`, recursing into `children`
/// for collections unless the child count exceeds `tree.max_children()`,
/// in which case a diagnostic string stands in for the nested array
/// (§4.4).
pub fn element_properties(tree: &ElementTree, cookie: Cookie) -> PropertyMap {
    let e = tree.element(cookie);
    let mut map = PropertyMap::new();

    map.insert("Cookie", PropertyValue::UInt(e.cookie.0 as u64));
    map.insert("Type", PropertyValue::UInt(element_type_code(e.element_type)));
    if let Some(ct) = e.collection_type {
        map.insert("CollectionType", PropertyValue::UInt(ct as u64));
    }
    map.insert("Usage", PropertyValue::UInt(e.usage() as u64));
    map.insert("UsagePage", PropertyValue::UInt(e.usage_page as u64));
    map.insert("ReportID", PropertyValue::UInt(e.report_id as u64));
    map.insert("VariableSize", PropertyValue::Bool(e.is_variable_size()));
    map.insert("Size", PropertyValue::UInt(e.field_bits().unwrap_or(0) as u64));
    map.insert("ReportSize", PropertyValue::UInt(e.report_bits as u64));
    map.insert("ReportCount", PropertyValue::UInt(e.report_count as u64));
    map.insert("Flags", PropertyValue::UInt(e.flags.bits() as u64));
    map.insert("Min", PropertyValue::Int(e.logical_min as i64));
    map.insert("Max", PropertyValue::Int(e.logical_max as i64));
    map.insert("ScaledMin", PropertyValue::Int(e.physical_min as i64));
    map.insert("ScaledMax", PropertyValue::Int(e.physical_max as i64));
    map.insert("Unit", PropertyValue::UInt(e.units as u64));
    map.insert("UnitExponent", PropertyValue::UInt(e.unit_exponent as u64));

    if let Some(handler) = e.duplicate_report_handler {
        if handler != e.cookie {
            map.insert("DuplicateIndex", PropertyValue::UInt(e.range_index as u64));
        }
    }

    map.insert("HasNullState", PropertyValue::Bool(e.flags.contains(MainFlags::NULL_STATE)));
    map.insert("HasPreferredState", PropertyValue::Bool(!e.flags.contains(MainFlags::NO_PREFERRED)));
    map.insert("IsNonLinear", PropertyValue::Bool(e.flags.contains(MainFlags::NON_LINEAR)));
    map.insert("IsRelative", PropertyValue::Bool(e.is_relative()));
    map.insert("IsWrapping", PropertyValue::Bool(e.flags.contains(MainFlags::WRAP)));
    map.insert("IsArray", PropertyValue::Bool(e.is_array()));

    if e.kind == ElementKind::Collection {
        map.insert("Children", children_value(tree, e));
    }

    map
}

fn children_value(tree: &ElementTree, e: &Element) -> PropertyValue {
    if e.children.len() > tree.max_children() {
        return PropertyValue::ElidedChildren(format!(
            "{} children elided (limit {})",
            e.children.len(),
            tree.max_children()
        ));
    }
    PropertyValue::Children(e.children.iter().map(|&c| element_properties(tree, c)).collect())
}

/// `true` iff every key present in `matching` is also present in `cookie`'s
/// own property dictionary with an equal value. Keys `matching` doesn't
/// mention are ignored, matching `IOHIDElementPrivate::matchProperties`'s
/// "only compare the keys the caller cares about" semantics.
pub fn match_properties(tree: &ElementTree, cookie: Cookie, matching: &PropertyMap) -> bool {
    let own = element_properties(tree, cookie);
    matching.iter().all(|(key, want)| own.get(key).is_some_and(|have| have == want))
}
