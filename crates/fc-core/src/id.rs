use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

/// Global string interner for host ids.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

macro_rules! interned_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Spur);

        impl $name {
            /// Intern a host id string, or return the existing handle.
            pub fn intern(s: &str) -> Self {
                $name(INTERNER.get_or_intern(s))
            }

            /// Resolve back to the host's string form.
            pub fn as_str(&self) -> &str {
                INTERNER.resolve(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name::intern(&s))
            }
        }
    };
}

interned_id! {
    /// Identifier of a scene node as reported by the host (e.g. `12:345`).
    /// Internally a 4-byte `Spur` index.
    NodeId
}

interned_id! {
    /// Identifier of a design variable (e.g. `VariableID:1:7`).
    VariableId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_roundtrip() {
        let a = NodeId::intern("12:34");
        let b = NodeId::intern("12:34");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "12:34");
    }

    #[test]
    fn node_and_variable_ids_share_strings_but_not_types() {
        let n = NodeId::intern("1:2");
        let v = VariableId::intern("1:2");
        assert_eq!(n.as_str(), v.as_str());
        assert_eq!(format!("{v:?}"), "VariableId(1:2)");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = NodeId::intern("7:8");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"7:8\"");
        let back: NodeId = serde_json::from_str("\"7:8\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_key_ordered_maps() {
        let mut styles = std::collections::BTreeMap::new();
        styles.entry(NodeId::intern("3:1")).or_insert_with(Vec::new).push("gap");
        styles.entry(NodeId::intern("3:1")).or_insert_with(Vec::new).push("margin");
        styles.insert(NodeId::intern("3:2"), vec!["z-index"]);
        assert_eq!(styles.len(), 2);
        assert_eq!(styles[&NodeId::intern("3:1")], vec!["gap", "margin"]);
    }
}
