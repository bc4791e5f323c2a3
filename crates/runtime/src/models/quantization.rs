//! GGUF quantization codes and the deny-list applied at bind time

use std::collections::BTreeSet;

/// File types the native loader no longer accepts
pub const DEFAULT_DEPRECATED_QUANTIZATIONS: [u32; 6] = [4, 5, 6, 33, 34, 35];

/// Human name for a GGUF `general.file_type` code
pub fn file_type_name(code: u32) -> Option<&'static str> {
    let name = match code {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        4 => "Q4_1_SOME_F16",
        5 => "Q4_2",
        6 => "Q4_3",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        19 => "IQ2_XXS",
        20 => "IQ2_XS",
        21 => "Q2_K_S",
        22 => "IQ3_XS",
        23 => "IQ3_XXS",
        24 => "IQ1_S",
        25 => "IQ4_NL",
        26 => "IQ3_S",
        27 => "IQ3_M",
        28 => "IQ2_S",
        29 => "IQ2_M",
        30 => "IQ4_XS",
        31 => "IQ1_M",
        32 => "BF16",
        33 => "Q4_0_4_4",
        34 => "Q4_0_4_8",
        35 => "Q4_0_8_8",
        36 => "TQ1_0",
        37 => "TQ2_0",
        _ => return None,
    };
    Some(name)
}

/// Display label for an optional code, falling back to the raw number
pub fn quantization_label(code: Option<u32>) -> String {
    match code {
        Some(code) => file_type_name(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("type {}", code)),
        None => "unknown".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationPolicy {
    denied: BTreeSet<u32>,
}

impl Default for QuantizationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DEPRECATED_QUANTIZATIONS)
    }
}

impl QuantizationPolicy {
    pub fn new(denied: impl IntoIterator<Item = u32>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
        }
    }

    /// Unknown quantization is never treated as deprecated
    pub fn is_deprecated(&self, code: Option<u32>) -> bool {
        code.is_some_and(|c| self.denied.contains(&c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = QuantizationPolicy::default();
        assert!(policy.is_deprecated(Some(4)));
        assert!(policy.is_deprecated(Some(35)));
        assert!(!policy.is_deprecated(Some(15)));
        assert!(!policy.is_deprecated(None));
    }

    #[test]
    fn test_custom_policy() {
        let policy = QuantizationPolicy::new([2]);
        assert!(policy.is_deprecated(Some(2)));
        assert!(!policy.is_deprecated(Some(4)));
    }

    #[test]
    fn test_labels() {
        assert_eq!(quantization_label(Some(15)), "Q4_K_M");
        assert_eq!(quantization_label(Some(99)), "type 99");
        assert_eq!(quantization_label(None), "unknown");
    }
}
