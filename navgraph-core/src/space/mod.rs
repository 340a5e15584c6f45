//! Distance capabilities consumed by the HNSW index.
//!
//! The index never interprets vector payloads itself: it stores opaque bytes
//! of [`Space::data_size`] length and delegates every comparison to the
//! configured [`Space`]. Two scalar reference spaces over little-endian `f32`
//! components are provided for convenience.

mod inner_product;
mod l2;

pub use self::{inner_product::InnerProductSpace, l2::L2Space};

/// Distance capability parameterising an index.
///
/// Implementations must be deterministic and return finite values for
/// well-formed inputs. Smaller distances mean closer vectors.
///
/// # Examples
/// ```
/// use navgraph_core::{L2Space, Space};
///
/// let space = L2Space::new(2);
/// let left = L2Space::encode(&[0.0, 0.0]);
/// let right = L2Space::encode(&[3.0, 4.0]);
/// assert_eq!(space.data_size(), 8);
/// assert_eq!(space.distance(&left, &right), 25.0);
/// ```
pub trait Space: Send + Sync {
    /// Returns the byte length of one stored vector.
    fn data_size(&self) -> usize;

    /// Returns the dimensionality forwarded to the comparison kernel.
    fn dim(&self) -> usize;

    /// Compares two vectors of [`Space::data_size`] bytes each.
    fn distance(&self, left: &[u8], right: &[u8]) -> f32;

    /// Returns a short identifier for diagnostics.
    fn name(&self) -> &str;
}

/// Serialises `f32` components into the little-endian byte layout used by
/// the reference spaces.
#[must_use]
pub fn encode_f32(components: &[f32]) -> Vec<u8> {
    components
        .iter()
        .flat_map(|component| component.to_le_bytes())
        .collect()
}

/// Decodes a little-endian `f32` payload. Trailing bytes that do not form a
/// whole component are ignored.
#[must_use]
pub fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    components(bytes).collect()
}

pub(crate) fn components(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(&[])]
    #[case::single(&[1.5])]
    #[case::mixed(&[-2.0, 0.0, 3.25, f32::MAX])]
    fn decode_restores_encoded_components(#[case] components: &[f32]) {
        let bytes = encode_f32(components);
        assert_eq!(bytes.len(), components.len() * 4);
        assert_eq!(decode_f32(&bytes), components);
    }

    #[test]
    fn decode_ignores_partial_component() {
        let mut bytes = encode_f32(&[1.0]);
        bytes.push(0xFF);
        assert_eq!(decode_f32(&bytes), vec![1.0]);
    }
}
