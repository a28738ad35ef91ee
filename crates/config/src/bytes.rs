//! Byte-size parsing for config values like `"100MiB"`
//!
//! Plain integers are raw bytes; suffixed strings use 1024-based units
//! (`kb` and `kib` both mean 1024). Case-insensitive.

use serde::de::{self, Deserializer, Visitor};

/// Parse a human byte size: `"4096"`, `"64KiB"`, `"1 GB"`
pub fn parse_bytes(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("'{s}' has no numeric part"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("'{digits}' is not a number: {e}"))?;

    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(format!("unknown byte unit '{other}'")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{s}' overflows a byte count"))
}

/// Serde deserializer accepting either an integer or a suffixed string
pub(crate) fn deserialize<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct BytesVisitor;

    impl Visitor<'_> for BytesVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a byte count or a string like \"100MiB\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("byte count cannot be negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u64, E> {
            parse_bytes(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(BytesVisitor)
}
