use std::fmt;

use serde::{Deserialize, Deserializer};

macro_rules! sds_type_codes {
    ($($variant:ident = $code:literal),* $(,)?) => {
        /// The code identifying the shape of an SDS type.
        ///
        /// SDS serializes type codes either as numbers or as names depending on
        /// the endpoint; both forms are accepted. Codes without a dedicated
        /// variant (arrays, enumerations, lists) are kept as [`SdsTypeCode::Other`].
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub enum SdsTypeCode {
            $($variant,)*
            Other(String),
        }

        impl SdsTypeCode {
            pub fn from_code(code: u64) -> Self {
                match code {
                    $($code => Self::$variant,)*
                    other => Self::Other(other.to_string()),
                }
            }

            pub fn from_name(name: &str) -> Self {
                match name {
                    $(stringify!($variant) => Self::$variant,)*
                    other => Self::Other(other.to_string()),
                }
            }

            pub fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                    Self::Other(name) => name,
                }
            }
        }
    };
}

sds_type_codes! {
    Empty = 0,
    Object = 1,
    DBNull = 2,
    Boolean = 3,
    Char = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    String = 18,
    Guid = 19,
    DateTimeOffset = 20,
    TimeSpan = 21,
    Version = 22,
    NullableBoolean = 103,
    NullableChar = 104,
    NullableSByte = 105,
    NullableByte = 106,
    NullableInt16 = 107,
    NullableUInt16 = 108,
    NullableInt32 = 109,
    NullableUInt32 = 110,
    NullableInt64 = 111,
    NullableUInt64 = 112,
    NullableSingle = 113,
    NullableDouble = 114,
    NullableDecimal = 115,
    NullableDateTime = 116,
    NullableGuid = 119,
    NullableDateTimeOffset = 120,
    NullableTimeSpan = 121,
}

impl fmt::Display for SdsTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<'de> Deserialize<'de> for SdsTypeCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(u64),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Self::from_code(code),
            Raw::Name(name) => Self::from_name(&name),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_and_named_codes_agree() {
        for (code, name) in [(3, "Boolean"), (16, "DateTime"), (114, "NullableDouble")] {
            assert_eq!(SdsTypeCode::from_code(code), SdsTypeCode::from_name(name));
            assert_eq!(SdsTypeCode::from_code(code).name(), name);
        }
    }

    #[test]
    fn unknown_codes_are_kept() {
        assert_eq!(
            SdsTypeCode::from_code(214),
            SdsTypeCode::Other("214".to_string())
        );
        let parsed: SdsTypeCode = serde_json::from_str(r#""DoubleArray""#).unwrap();
        assert_eq!(parsed.to_string(), "DoubleArray");
    }
}
