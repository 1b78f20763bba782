use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// TPG attributes managed by the target manager. The string form is the name
/// of the attribute file under the TPG's `attrib` directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TpgAttribute {
    Authentication,
    CacheDynamicAcls,
    DemoModeWriteProtect,
    GenerateNodeAcls,
}

impl TpgAttribute {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Desired values of the managed TPG attributes.
///
/// The default is the only set applied in practice: no CHAP, dynamic ACLs
/// generated and cached, writes allowed in demo mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TpgAttributes {
    pub authentication: bool,
    pub cache_dynamic_acls: bool,
    pub demo_mode_write_protect: bool,
    pub generate_node_acls: bool,
}

impl Default for TpgAttributes {
    fn default() -> Self {
        Self {
            authentication: false,
            cache_dynamic_acls: true,
            demo_mode_write_protect: false,
            generate_node_acls: true,
        }
    }
}

impl TpgAttributes {
    /// Returns every managed attribute with the value to write to its
    /// attribute file, in a fixed order.
    pub fn values(&self) -> [(TpgAttribute, &'static str); 4] {
        [
            (TpgAttribute::Authentication, flag(self.authentication)),
            (TpgAttribute::CacheDynamicAcls, flag(self.cache_dynamic_acls)),
            (
                TpgAttribute::DemoModeWriteProtect,
                flag(self.demo_mode_write_protect),
            ),
            (TpgAttribute::GenerateNodeAcls, flag(self.generate_node_acls)),
        ]
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn test_attribute_names() {
        let names: Vec<_> = TpgAttribute::iter().map(|a| a.name()).collect();
        assert_eq!(
            names,
            vec![
                "authentication",
                "cache_dynamic_acls",
                "demo_mode_write_protect",
                "generate_node_acls"
            ]
        );
        assert_eq!(TpgAttribute::GenerateNodeAcls.to_string(), "generate_node_acls");
    }

    #[test]
    fn test_default_values() {
        assert_eq!(
            TpgAttributes::default().values(),
            [
                (TpgAttribute::Authentication, "0"),
                (TpgAttribute::CacheDynamicAcls, "1"),
                (TpgAttribute::DemoModeWriteProtect, "0"),
                (TpgAttribute::GenerateNodeAcls, "1"),
            ]
        );
    }
}
