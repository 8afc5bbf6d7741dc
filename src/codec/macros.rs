//! Code generation for unions and open enums

/// Declare a discriminated union
///
/// Generates the enum (with an extra `Raw` arm), its [`Union`](crate::codec::Union)
/// registry, `tag()`, and serde impls. Each arm's tag is a literal, so an encoded
/// value always carries the tag of the arm it came from.
///
/// ```ignore
/// armrt::discriminated_union! {
///     /// Compute attached to a workspace
///     pub enum Compute: "computeType" {
///         "AKS" => Aks(AksCompute),
///         "AmlCompute" => AmlCompute(AmlCompute),
///     }
/// }
/// ```
#[macro_export]
macro_rules! discriminated_union {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $field:literal {
            $(
                $(#[$vmeta:meta])*
                $tag:literal => $variant:ident($inner:ty)
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant($inner),
            )+
            /// A variant this client does not know, kept verbatim
            Raw($crate::codec::RawVariant),
        }

        impl $name {
            /// Discriminator value of this arm
            pub fn tag(&self) -> &str {
                match self {
                    $( Self::$variant(_) => $tag, )+
                    Self::Raw(raw) => raw.tag(),
                }
            }
        }

        impl $crate::codec::Union for $name {
            const TYPE_NAME: &'static str = stringify!($name);
            const DISCRIMINATOR: &'static str = $field;
            const TAGS: &'static [&'static str] = &[$($tag),+];

            fn decode_variant(
                tag: &'static str,
                envelope: $crate::__private::serde_json::Value,
            ) -> ::std::result::Result<Self, $crate::__private::serde_json::Error> {
                $(
                    if tag == $tag {
                        return $crate::__private::serde_json::from_value::<$inner>(envelope)
                            .map(Self::$variant);
                    }
                )+
                Err(<$crate::__private::serde_json::Error as $crate::__private::serde::de::Error>::custom(
                    ::std::format!("no arm registered for tag `{}`", tag),
                ))
            }

            fn from_raw(raw: $crate::codec::RawVariant) -> Self {
                Self::Raw(raw)
            }

            fn encode_variant(
                &self,
            ) -> ::std::result::Result<$crate::codec::Encoded<'_>, $crate::__private::serde_json::Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok($crate::codec::Encoded::Known {
                            tag: $tag,
                            fields: $crate::__private::serde_json::to_value(inner)?,
                        }),
                    )+
                    Self::Raw(raw) => Ok($crate::codec::Encoded::Raw(raw)),
                }
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                $crate::codec::serialize(self, serializer)
            }
        }

        impl<'de> $crate::__private::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: $crate::__private::serde::Deserializer<'de>,
            {
                $crate::codec::deserialize(deserializer)
            }
        }
    };
}

/// Declare a string enum that tolerates values it does not know
///
/// Parsing ignores case; a value matching no constant is kept in `Other` and
/// serialized back exactly as received.
///
/// ```ignore
/// armrt::open_enum! {
///     pub enum CertificateType {
///         Dedicated => "Dedicated",
///         Shared => "Shared",
///     }
/// }
/// assert_eq!(CertificateType::parse("shared"), CertificateType::Shared);
/// ```
#[macro_export]
macro_rules! open_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $value:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
            /// A value this client does not know
            Other(::std::string::String),
        }

        impl $name {
            /// Documented wire values
            pub fn possible_values() -> &'static [&'static str] {
                &[$($value),+]
            }

            /// Case-insensitive parse; unknown values become `Other`
            pub fn parse(input: &str) -> Self {
                $(
                    if input.eq_ignore_ascii_case($value) {
                        return Self::$variant;
                    }
                )+
                Self::Other(input.to_string())
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $value, )+
                    Self::Other(value) => value.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::std::convert::Infallible;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Ok(Self::parse(s))
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> $crate::__private::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: $crate::__private::serde::Deserializer<'de>,
            {
                let value = <::std::string::String as $crate::__private::serde::Deserialize>::deserialize(deserializer)?;
                Ok(Self::parse(&value))
            }
        }
    };
}
