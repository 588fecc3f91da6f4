use crate::api::error::QuantError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Elements per quantization block, shared by every format.
pub const QK: usize = 32;

/// Q8_0: f16 scale + 32 × i8.
pub const Q8_0_BLOCK_BYTES: usize = 34;

/// Q5_0: f16 scale + u32 high bits + 16 bytes of packed low nibbles.
pub const Q5_0_BLOCK_BYTES: usize = 22;

/// Q4_1: f16 scale + f16 minimum + 16 bytes of packed nibbles.
pub const Q4_1_BLOCK_BYTES: usize = 20;

/// Q4_0: f16 scale + 16 bytes of packed nibbles.
pub const Q4_0_BLOCK_BYTES: usize = 18;

/// Blocks decoded per span in the quantized GEMM (one stack buffer).
pub const SPAN_BLOCKS: usize = 8;

/// Block quantization formats, in decreasing precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantFormat {
    #[serde(rename = "q8_0")]
    Q8_0,
    #[serde(rename = "q5_0")]
    Q5_0,
    #[serde(rename = "q4_1")]
    Q4_1,
    #[serde(rename = "q4_0")]
    Q4_0,
}

impl QuantFormat {
    pub const ALL: [QuantFormat; 4] = [Self::Q8_0, Self::Q5_0, Self::Q4_1, Self::Q4_0];

    pub fn block_bytes(self) -> usize {
        match self {
            Self::Q8_0 => Q8_0_BLOCK_BYTES,
            Self::Q5_0 => Q5_0_BLOCK_BYTES,
            Self::Q4_1 => Q4_1_BLOCK_BYTES,
            Self::Q4_0 => Q4_0_BLOCK_BYTES,
        }
    }

    /// Bytes needed to store `n_elements` (must be a multiple of [`QK`]).
    pub fn storage_bytes(self, n_elements: usize) -> usize {
        n_elements / QK * self.block_bytes()
    }

    /// Worst-case per-element reconstruction error as a fraction of the
    /// block's largest magnitude.
    ///
    /// The symmetric 4- and 5-bit formats clamp the top code on the side
    /// opposite the signed maximum, which costs one full step there.
    pub fn max_error_ratio(self) -> f32 {
        match self {
            Self::Q8_0 => 0.005,
            Self::Q5_0 => 0.064,
            Self::Q4_1 => 0.068,
            Self::Q4_0 => 0.126,
        }
    }

    /// Map a GGML tensor type id to a format.
    pub fn from_ggml_type(id: u32) -> Result<Self, QuantError> {
        match id {
            2 => Ok(Self::Q4_0),
            3 => Ok(Self::Q4_1),
            6 => Ok(Self::Q5_0),
            8 => Ok(Self::Q8_0),
            other => Err(QuantError::UnsupportedFormat(format!("ggml type {}", other))),
        }
    }

    pub fn ggml_type(self) -> u32 {
        match self {
            Self::Q4_0 => 2,
            Self::Q4_1 => 3,
            Self::Q5_0 => 6,
            Self::Q8_0 => 8,
        }
    }
}

impl fmt::Display for QuantFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Q8_0 => "q8_0",
            Self::Q5_0 => "q5_0",
            Self::Q4_1 => "q4_1",
            Self::Q4_0 => "q4_0",
        };
        f.write_str(name)
    }
}

impl FromStr for QuantFormat {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "q8_0" => Ok(Self::Q8_0),
            "q5_0" => Ok(Self::Q5_0),
            "q4_1" => Ok(Self::Q4_1),
            "q4_0" => Ok(Self::Q4_0),
            _ => Err(QuantError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for format in QuantFormat::ALL {
            let parsed: QuantFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
        assert!(matches!("Q4_0".parse::<QuantFormat>(), Ok(QuantFormat::Q4_0)));
        assert!(matches!(
            "q2_k".parse::<QuantFormat>(),
            Err(QuantError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_ggml_type_ids() {
        for format in QuantFormat::ALL {
            assert_eq!(QuantFormat::from_ggml_type(format.ggml_type()).unwrap(), format);
        }
        // 12 is Q4_K, a super-block format
        assert!(QuantFormat::from_ggml_type(12).is_err());
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(QuantFormat::Q8_0.storage_bytes(64), 68);
        assert_eq!(QuantFormat::Q4_0.storage_bytes(4096), 128 * 18);
    }
}
