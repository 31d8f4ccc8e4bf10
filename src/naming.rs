//! Stable names derived from types.
//!
//! Stores, options sections and error messages refer to types by these names.

/// Last path segment of a type's name, without generic arguments.
///
/// ```
/// struct Counter;
/// assert_eq!(statehouse::naming::short_type_name::<Counter>(), "Counter");
/// assert_eq!(statehouse::naming::short_type_name::<Vec<u8>>(), "Vec");
/// ```
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = match full.find('<') {
        Some(idx) => &full[..idx],
        None => full,
    };
    match base.rfind("::") {
        Some(idx) => &base[idx + 2..],
        None => base,
    }
}

/// Name of the store holding state `S`; also the per-state configuration subsection.
pub fn store_name<S: ?Sized>() -> &'static str {
    short_type_name::<S>()
}

/// Key under which options `O` for the store of `S` are registered.
pub fn options_name<O: ?Sized, S: ?Sized>() -> String {
    format!("{}:{}", std::any::type_name::<O>(), std::any::type_name::<S>())
}
