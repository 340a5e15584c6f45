use super::{Space, components, decode_f32, encode_f32};

/// Inner-product distance (`1 - <a, b>`) over little-endian `f32` vectors.
///
/// Only meaningful for normalised inputs; the value is not a metric and may
/// be negative for unnormalised vectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InnerProductSpace {
    dim: usize,
}

impl InnerProductSpace {
    /// Creates a space over `dim`-component vectors.
    #[must_use]
    pub const fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Encodes components into the byte layout expected by this space.
    #[must_use]
    pub fn encode(components: &[f32]) -> Vec<u8> {
        encode_f32(components)
    }

    /// Decodes a stored payload back into components.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Vec<f32> {
        decode_f32(bytes)
    }
}

impl Space for InnerProductSpace {
    #[rustfmt::skip]
    fn data_size(&self) -> usize { self.dim * 4 }

    #[rustfmt::skip]
    fn dim(&self) -> usize { self.dim }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        let dot: f32 = components(left)
            .zip(components(right))
            .map(|(l, r)| l * r)
            .sum();
        1.0 - dot
    }

    fn name(&self) -> &str {
        "ip"
    }
}
