//! Named bundles of reconciliation parameters (spec.md §4.4). A variant fixes the number of
//! cascade passes, the per-pass block-size schedule, and the BICONF/cascade flags; the engine
//! itself carries no built-in knowledge of any particular schedule.

use crate::error::{CascadeError, Result};

/// Estimated bit error rates below this floor are clamped up to it before sizing blocks, so a
/// reported QBER of exactly 0 still produces a finite, sane block size.
pub const MIN_ESTIMATED_BIT_ERROR_RATE: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantName {
    Original,
    Biconf,
    YanEtAl,
    Option3,
    Option4,
    Option7,
    Option8,
}

impl VariantName {
    fn as_str(self) -> &'static str {
        match self {
            VariantName::Original => "original",
            VariantName::Biconf => "biconf",
            VariantName::YanEtAl => "yanetal",
            VariantName::Option3 => "option3",
            VariantName::Option4 => "option4",
            VariantName::Option7 => "option7",
            VariantName::Option8 => "option8",
        }
    }
}

/// A predefined cascade parameter bundle (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub name: VariantName,
    pub cascade_iterations: u32,
    pub biconf_iterations: u32,
    pub biconf_error_free_streak: bool,
    pub biconf_correct_complement: bool,
    pub biconf_cascade: bool,
    pub sub_block_reuse: bool,
    pub block_parity_inference: bool,
}

impl Variant {
    /// Look up a predefined variant by name. An unknown name is a fatal configuration error
    /// (spec.md §6).
    pub fn by_name(name: &str) -> Result<Variant> {
        let variant_name = match name {
            "original" => VariantName::Original,
            "biconf" => VariantName::Biconf,
            "yanetal" => VariantName::YanEtAl,
            "option3" => VariantName::Option3,
            "option4" => VariantName::Option4,
            "option7" => VariantName::Option7,
            "option8" => VariantName::Option8,
            _ => return Err(CascadeError::UnknownVariant(name.to_string())),
        };
        Ok(Self::new(variant_name))
    }

    pub fn name(&self) -> &'static str {
        self.name.as_str()
    }

    fn new(name: VariantName) -> Variant {
        // block_parity_inference is not varied by the predefined schedules in spec.md §4.4's
        // table; every predefined variant enables it.
        match name {
            VariantName::Original => Variant {
                name,
                cascade_iterations: 4,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: false,
                block_parity_inference: true,
            },
            VariantName::Biconf => Variant {
                name,
                cascade_iterations: 2,
                biconf_iterations: 10,
                biconf_error_free_streak: true,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: false,
                block_parity_inference: true,
            },
            VariantName::YanEtAl => Variant {
                name,
                cascade_iterations: 10,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: false,
                block_parity_inference: true,
            },
            VariantName::Option3 => Variant {
                name,
                cascade_iterations: 16,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: false,
                block_parity_inference: true,
            },
            VariantName::Option4 => Variant {
                name,
                cascade_iterations: 16,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: true,
                block_parity_inference: true,
            },
            VariantName::Option7 => Variant {
                name,
                cascade_iterations: 14,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: true,
                block_parity_inference: true,
            },
            VariantName::Option8 => Variant {
                name,
                cascade_iterations: 14,
                biconf_iterations: 0,
                biconf_error_free_streak: false,
                biconf_correct_complement: false,
                biconf_cascade: false,
                sub_block_reuse: true,
                block_parity_inference: true,
            },
        }
    }

    /// Block size for pass `iteration_nr` (1-based), clamped to `[1, key_size]`.
    pub fn block_size(&self, estimated_bit_error_rate: f32, key_size: u32, iteration_nr: u32) -> u32 {
        assert!(iteration_nr >= 1);
        let est = (estimated_bit_error_rate as f64).max(MIN_ESTIMATED_BIT_ERROR_RATE as f64);
        let k = iteration_nr;
        let raw = match self.name {
            VariantName::Original => (0.73 / est).ceil() * 2f64.powi((k - 1) as i32),
            VariantName::Biconf => (0.92 / est).ceil() * 3f64.powi((k - 1) as i32),
            VariantName::YanEtAl => {
                let base = (0.80 / est).ceil();
                match k {
                    1 => base,
                    2 => 5.0 * base,
                    _ => key_size as f64 / 2.0,
                }
            }
            VariantName::Option3 | VariantName::Option4 => {
                let base = (1.0 / est).ceil();
                match k {
                    1 => base,
                    2 => 2.0 * base,
                    _ => key_size as f64 / 2.0,
                }
            }
            VariantName::Option7 => {
                let base = 2f64.powf((1.0 / est).log2().ceil());
                match k {
                    1 => base,
                    2 => 4.0 * base,
                    _ => key_size as f64 / 2.0,
                }
            }
            VariantName::Option8 => {
                let alpha = (1.0 / est).log2() - 0.5;
                match k {
                    1 => 2f64.powf(alpha.ceil()),
                    2 => 2f64.powf(((alpha + 12.0) / 2.0).ceil()),
                    3 => 4096.0,
                    _ => key_size as f64 / 2.0,
                }
            }
        };
        raw.max(1.0).min(key_size as f64).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_variant_is_rejected() {
        assert_eq!(
            Variant::by_name("nonexistent"),
            Err(CascadeError::UnknownVariant("nonexistent".to_string()))
        );
    }

    #[test]
    fn test_original_block_sizes() {
        let variant = Variant::by_name("original").unwrap();
        assert_eq!(variant.cascade_iterations, 4);
        assert_eq!(variant.block_size(0.0, 10000, 1), 73000);
        assert_eq!(variant.block_size(0.1, 10000, 1), 8);
        assert_eq!(variant.block_size(0.01, 10000, 1), 73);
        assert_eq!(variant.block_size(0.01, 10000, 2), 146);
        assert_eq!(variant.block_size(0.01, 10000, 3), 292);
        assert_eq!(variant.block_size(0.001, 10000, 1), 730);
    }

    #[test]
    fn test_biconf_flags_and_sizes() {
        let variant = Variant::by_name("biconf").unwrap();
        assert_eq!(variant.cascade_iterations, 2);
        assert_eq!(variant.biconf_iterations, 10);
        assert!(variant.biconf_error_free_streak);
        assert!(!variant.biconf_correct_complement);
        assert_eq!(variant.block_size(0.01, 10000, 1), 92);
        assert_eq!(variant.block_size(0.01, 10000, 2), 276);
    }

    #[test]
    fn test_yanetal_falls_back_to_half_key_size() {
        let variant = Variant::by_name("yanetal").unwrap();
        assert_eq!(variant.cascade_iterations, 10);
        assert_eq!(variant.block_size(0.01, 10000, 3), 5000);
        assert_eq!(variant.block_size(0.01, 10000, 10), 5000);
    }

    #[test]
    fn test_option3_vs_option4_sub_block_reuse() {
        let option3 = Variant::by_name("option3").unwrap();
        let option4 = Variant::by_name("option4").unwrap();
        assert!(!option3.sub_block_reuse);
        assert!(option4.sub_block_reuse);
        assert_eq!(
            option3.block_size(0.01, 10000, 1),
            option4.block_size(0.01, 10000, 1)
        );
    }

    #[test]
    fn test_option7_and_option8_use_powers_of_two() {
        let option7 = Variant::by_name("option7").unwrap();
        assert_eq!(option7.block_size(0.01, 10000, 1), 128);
        let option8 = Variant::by_name("option8").unwrap();
        assert_eq!(option8.block_size(0.01, 10000, 3), 4096);
    }

    #[test]
    fn test_block_size_never_exceeds_key_size() {
        let variant = Variant::by_name("original").unwrap();
        assert_eq!(variant.block_size(0.5, 4, 4), 4);
    }
}
