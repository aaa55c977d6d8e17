use super::{max_level, KMeans, Quantizer};

/// Codebook of `2^nbits` values; a weight stores the index of its nearest entry.
///
/// Only the first `active` entries are real centroids, sorted ascending. The
/// remainder is zero padding so the table always has `2^nbits` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    nbits: u8,
    values: Vec<f32>,
    active: usize,
}

impl LookupTable {
    pub fn from_entries(mut entries: Vec<f32>, nbits: u8) -> Self {
        let size = max_level(nbits) as usize + 1;
        entries.retain(|v| v.is_finite());
        entries.sort_by(f32::total_cmp);
        entries.truncate(size);

        let active = entries.len();
        entries.resize(size, 0.0);
        LookupTable {
            nbits,
            values: entries,
            active,
        }
    }

    /// Evenly spaced table `min + i * scale` for `i` in `0..2^nbits`.
    pub fn linear(min_val: f32, max_val: f32, nbits: u8) -> Self {
        let levels = max_level(nbits);
        let range = max_val - min_val;
        let scale = if range > 0.0 {
            range / levels as f32
        } else {
            1.0
        };
        let entries = (0..=levels).map(|i| min_val + i as f32 * scale).collect();
        Self::from_entries(entries, nbits)
    }

    pub fn kmeans(values: &[f32], nbits: u8, seed: u64) -> Self {
        let k = max_level(nbits) as usize + 1;
        Self::from_entries(KMeans::new(k, seed).fit(values), nbits)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn active(&self) -> usize {
        self.active
    }
}

impl Quantizer for LookupTable {
    fn nbits(&self) -> u8 {
        self.nbits
    }

    fn quantize(&self, real_val: f32) -> u32 {
        let entries = &self.values[..self.active];
        if entries.is_empty() {
            return 0;
        }

        let upper = entries.partition_point(|&c| c < real_val);
        if upper == 0 {
            return 0;
        }
        if upper == entries.len() {
            return (entries.len() - 1) as u32;
        }

        let lower = upper - 1;
        if real_val - entries[lower] <= entries[upper] - real_val {
            lower as u32
        } else {
            upper as u32
        }
    }

    fn dequantize(&self, q_val: u32) -> f32 {
        self.values.get(q_val as usize).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_table_is_evenly_spaced() {
        let table = LookupTable::linear(-1.0, 2.0, 2);

        assert_eq!(&[-1.0, 0.0, 1.0, 2.0], table.values());
        assert_eq!(4, table.active());
    }

    #[test]
    fn nearest_entry_wins() {
        let table = LookupTable::from_entries(vec![0.0, 1.0, 10.0], 2);

        assert_eq!(0, table.quantize(-3.0));
        assert_eq!(0, table.quantize(0.4));
        assert_eq!(1, table.quantize(0.6));
        assert_eq!(1, table.quantize(5.4));
        assert_eq!(2, table.quantize(5.6));
        assert_eq!(2, table.quantize(100.0));
    }

    #[test]
    fn padding_is_never_selected() {
        let table = LookupTable::from_entries(vec![3.0, 1.0], 3);

        assert_eq!(&[1.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], table.values());
        assert_eq!(0, table.quantize(0.0));
        assert_eq!(1, table.quantize(2.5));
    }

    #[test]
    fn kmeans_table_reproduces_few_distinct_values() {
        let values = [0.5, -0.25, 0.5, 0.5, -0.25, 2.0];
        let table = LookupTable::kmeans(&values, 2, 0);

        assert_eq!(3, table.active());
        for v in values {
            assert_eq!(v, table.dequantize(table.quantize(v)));
        }
    }
}
