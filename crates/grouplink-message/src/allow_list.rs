use std::collections::BTreeSet;

use crate::error::{CodecError, Result};
use crate::value::{Value, ValueKind};

/// The payload value kinds a connection is willing to encode and decode.
///
/// The default list permits every built-in kind and no custom kinds. Custom
/// kinds are permitted by name with [`with_custom`](Self::with_custom).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    builtin: BTreeSet<ValueKind>,
    custom: BTreeSet<String>,
}

impl AllowList {
    /// Every built-in kind, no custom kinds.
    pub fn standard() -> Self {
        Self {
            builtin: ValueKind::BUILTIN.into_iter().collect(),
            custom: BTreeSet::new(),
        }
    }

    /// Nothing at all; only payload-free messages pass.
    pub fn empty() -> Self {
        Self {
            builtin: BTreeSet::new(),
            custom: BTreeSet::new(),
        }
    }

    /// Permit a built-in kind. `ValueKind::Custom` is ignored here; custom
    /// kinds are permitted by name.
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        if kind != ValueKind::Custom {
            self.builtin.insert(kind);
        }
        self
    }

    /// Stop permitting a built-in kind.
    pub fn without_kind(mut self, kind: ValueKind) -> Self {
        self.builtin.remove(&kind);
        self
    }

    /// Permit custom values tagged `kind`.
    pub fn with_custom(mut self, kind: impl Into<String>) -> Self {
        self.custom.insert(kind.into());
        self
    }

    /// Stop permitting custom values tagged `kind`.
    pub fn without_custom(mut self, kind: &str) -> Self {
        self.custom.remove(kind);
        self
    }

    pub fn permits_builtin(&self, kind: ValueKind) -> bool {
        self.builtin.contains(&kind)
    }

    pub fn permits_custom(&self, kind: &str) -> bool {
        self.custom.contains(kind)
    }

    pub fn permits(&self, value: &Value) -> bool {
        match value {
            Value::Custom(custom) => self.permits_custom(custom.kind()),
            other => self.permits_builtin(other.kind()),
        }
    }

    /// Registered custom kind names, in sorted order.
    pub fn custom_kinds(&self) -> impl Iterator<Item = &str> {
        self.custom.iter().map(String::as_str)
    }

    pub(crate) fn check(&self, key: &str, value: &Value) -> Result<()> {
        if self.permits(value) {
            Ok(())
        } else {
            Err(CodecError::DisallowedKind {
                key: key.to_string(),
                kind: value.kind_label(),
            })
        }
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CustomValue;

    #[test]
    fn standard_permits_builtins_only() {
        let allow = AllowList::standard();
        for value in [
            Value::from("s"),
            Value::from(1i64),
            Value::from(1.0),
            Value::from(false),
            Value::from(vec![0u8]),
        ] {
            assert!(allow.permits(&value), "{value:?}");
        }
        assert!(!allow.permits(&Value::from(CustomValue::new("color", Vec::<u8>::new()))));
    }

    #[test]
    fn custom_kinds_are_matched_by_name() {
        let allow = AllowList::standard().with_custom("color");
        assert!(allow.permits(&Value::from(CustomValue::new("color", Vec::<u8>::new()))));
        assert!(!allow.permits(&Value::from(CustomValue::new("colour", Vec::<u8>::new()))));
        assert_eq!(allow.custom_kinds().collect::<Vec<_>>(), vec!["color"]);

        let allow = allow.without_custom("color");
        assert!(!allow.permits_custom("color"));
    }

    #[test]
    fn builtins_can_be_narrowed() {
        let allow = AllowList::empty().with_kind(ValueKind::String);
        assert!(allow.permits(&Value::from("ok")));
        assert!(!allow.permits(&Value::from(2i64)));

        let allow = AllowList::standard().without_kind(ValueKind::Bytes);
        assert!(!allow.permits(&Value::from(vec![1u8])));
    }

    #[test]
    fn custom_kind_is_not_a_builtin_switch() {
        let allow = AllowList::empty().with_kind(ValueKind::Custom);
        assert!(!allow.permits_builtin(ValueKind::Custom));
    }

    #[test]
    fn check_names_key_and_kind() {
        let err = AllowList::empty()
            .check("when", &Value::from(1.5))
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::DisallowedKind { ref key, ref kind } if key == "when" && kind == "float"
        ));
    }
}
