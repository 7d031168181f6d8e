/// Closed enumeration with an explicit string mapping.
///
/// Lookup is case-insensitive and treats `-`, `_` and runs of whitespace as
/// equivalent. A failed lookup reports every allowed canonical value.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident => $canon:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const FIELD: &'static str = $field;

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $canon),+
                }
            }

            pub fn parse(raw: &str) -> Result<Self, $crate::error::SpecParseError> {
                let key = $crate::closed_enum::normalize_key(raw);
                $(
                    if key == $crate::closed_enum::normalize_key($canon)
                        $(|| key == $crate::closed_enum::normalize_key($alias))*
                    {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::error::SpecParseError::InvalidValue {
                    field: $field,
                    value: raw.trim().to_string(),
                    allowed: Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", "),
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) fn normalize_key(s: &str) -> String {
    s.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
