use super::{Space, components, decode_f32, encode_f32};

/// Squared Euclidean distance over little-endian `f32` vectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct L2Space {
    dim: usize,
}

impl L2Space {
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

impl Space for L2Space {
    #[rustfmt::skip]
    fn data_size(&self) -> usize { self.dim * 4 }

    #[rustfmt::skip]
    fn dim(&self) -> usize { self.dim }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        let mut sum = 0.0f32;
        for (l, r) in components(left).zip(components(right)) {
            let diff = l - r;
            sum += diff * diff;
        }
        sum
    }

    fn name(&self) -> &str {
        "l2"
    }
}
