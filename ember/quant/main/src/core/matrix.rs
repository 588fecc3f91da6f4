use crate::api::error::{QuantError, QuantResult};
use crate::api::types::*;
use crate::core::codec::*;
use ember_core::Tensor;

/// Quantize a flat f32 slice. Length must be a multiple of [`QK`].
pub fn quantize(format: QuantFormat, data: &[f32]) -> QuantResult<Vec<u8>> {
    match format {
        QuantFormat::Q8_0 => encode_all::<BlockQ8_0>(data),
        QuantFormat::Q5_0 => encode_all::<BlockQ5_0>(data),
        QuantFormat::Q4_1 => encode_all::<BlockQ4_1>(data),
        QuantFormat::Q4_0 => encode_all::<BlockQ4_0>(data),
    }
}

/// Dequantize `n_elements` values from raw block bytes.
pub fn dequantize(format: QuantFormat, raw: &[u8], n_elements: usize) -> QuantResult<Vec<f32>> {
    match format {
        QuantFormat::Q8_0 => decode_all::<BlockQ8_0>(raw, n_elements),
        QuantFormat::Q5_0 => decode_all::<BlockQ5_0>(raw, n_elements),
        QuantFormat::Q4_1 => decode_all::<BlockQ4_1>(raw, n_elements),
        QuantFormat::Q4_0 => decode_all::<BlockQ4_0>(raw, n_elements),
    }
}

fn check_aligned(format: QuantFormat, n_elements: usize) -> QuantResult<()> {
    if n_elements % QK != 0 {
        return Err(QuantError::BlockAlignment(format!(
            "{} requires element count divisible by {}, got {}",
            format, QK, n_elements
        )));
    }
    Ok(())
}

fn encode_all<C: BlockCodec>(data: &[f32]) -> QuantResult<Vec<u8>> {
    check_aligned(C::FORMAT, data.len())?;
    let mut output = vec![0u8; data.len() / QK * C::BLOCK_BYTES];
    for (values, block) in data.chunks_exact(QK).zip(output.chunks_exact_mut(C::BLOCK_BYTES)) {
        C::encode_block(values, block);
    }
    Ok(output)
}

fn decode_all<C: BlockCodec>(raw: &[u8], n_elements: usize) -> QuantResult<Vec<f32>> {
    check_aligned(C::FORMAT, n_elements)?;
    let expected = n_elements / QK * C::BLOCK_BYTES;
    if raw.len() != expected {
        return Err(QuantError::ShapeMismatch {
            expected: vec![expected],
            actual: vec![raw.len()],
        });
    }
    let mut out = vec![0.0f32; n_elements];
    for (block, values) in raw.chunks_exact(C::BLOCK_BYTES).zip(out.chunks_exact_mut(QK)) {
        C::decode_block(block, values);
    }
    Ok(out)
}

/// A row-major weight matrix of `rows` output features by `cols` inputs,
/// each row stored as `cols / 32` consecutive blocks.
#[derive(Debug, Clone)]
pub struct QuantizedMatrix {
    format: QuantFormat,
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl QuantizedMatrix {
    /// Wrap pre-quantized bytes, e.g. a tensor read from a GGUF file.
    pub fn from_bytes(format: QuantFormat, rows: usize, cols: usize, data: Vec<u8>) -> QuantResult<Self> {
        check_aligned(format, cols)?;
        let expected = rows * format.storage_bytes(cols);
        if data.len() != expected {
            return Err(QuantError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self { format, rows, cols, data })
    }

    pub fn quantize(format: QuantFormat, values: &[f32], rows: usize, cols: usize) -> QuantResult<Self> {
        if values.len() != rows * cols {
            return Err(QuantError::ShapeMismatch {
                expected: vec![rows, cols],
                actual: vec![values.len()],
            });
        }
        check_aligned(format, cols)?;
        let data = quantize(format, values)?;
        Ok(Self { format, rows, cols, data })
    }

    /// Quantize a 2-D `[out_features, in_features]` tensor.
    pub fn from_tensor(format: QuantFormat, tensor: &Tensor) -> QuantResult<Self> {
        match tensor.shape() {
            [rows, cols] => Self::quantize(format, tensor.as_slice(), *rows, *cols),
            other => Err(QuantError::ShapeMismatch {
                expected: vec![0, 0],
                actual: other.to_vec(),
            }),
        }
    }

    pub fn dequantize(&self) -> QuantResult<Vec<f32>> {
        dequantize(self.format, &self.data, self.rows * self.cols)
    }

    pub fn to_tensor(&self) -> QuantResult<Tensor> {
        Ok(Tensor::from_vec(self.dequantize()?, [self.rows, self.cols])?)
    }

    pub fn format(&self) -> QuantFormat {
        self.format
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn blocks_per_row(&self) -> usize {
        self.cols / QK
    }

    /// Block bytes of output feature `r`.
    #[inline]
    pub fn row_bytes(&self, r: usize) -> &[u8] {
        let stride = self.format.storage_bytes(self.cols);
        &self.data[r * stride..(r + 1) * stride]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_rejected() {
        let values = vec![1.0f32; 48];
        assert!(matches!(
            quantize(QuantFormat::Q4_0, &values),
            Err(QuantError::BlockAlignment(_))
        ));
        assert!(matches!(
            QuantizedMatrix::quantize(QuantFormat::Q8_0, &values, 2, 24),
            Err(QuantError::BlockAlignment(_))
        ));
    }

    #[test]
    fn test_from_bytes_validates_length() {
        let err = QuantizedMatrix::from_bytes(QuantFormat::Q4_1, 2, 64, vec![0u8; 79]).unwrap_err();
        assert!(matches!(err, QuantError::ShapeMismatch { .. }));
        let ok = QuantizedMatrix::from_bytes(QuantFormat::Q4_1, 2, 64, vec![0u8; 80]).unwrap();
        assert_eq!(ok.blocks_per_row(), 2);
        assert_eq!(ok.row_bytes(1).len(), 40);
    }

    #[test]
    fn test_rows_are_independent() {
        let mut values = vec![0.0f32; 3 * 64];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i / 64) as f32 + 1.0;
        }
        let m = QuantizedMatrix::quantize(QuantFormat::Q8_0, &values, 3, 64).unwrap();
        let back = m.dequantize().unwrap();
        for (i, v) in back.iter().enumerate() {
            assert!((v - ((i / 64) as f32 + 1.0)).abs() < 1e-2);
        }
    }

    #[test]
    fn test_tensor_roundtrip_shape() {
        let t = Tensor::from_vec((0..128).map(|i| i as f32 / 128.0).collect(), [2, 64]).unwrap();
        let m = QuantizedMatrix::from_tensor(QuantFormat::Q5_0, &t).unwrap();
        assert_eq!(m.to_tensor().unwrap().shape(), &[2, 64]);
        assert_eq!(m.byte_size(), 2 * 2 * Q5_0_BLOCK_BYTES);

        let flat = Tensor::from_vec(vec![0.0; 64], [64]).unwrap();
        assert!(QuantizedMatrix::from_tensor(QuantFormat::Q5_0, &flat).is_err());
    }
}
