//! Shard selection over the gene × region product.

use crate::domain::{GeneRegion, Shard};

/// Keys owned by `shard`: positions `i` of `keys` with `i % n == k - 1`.
///
/// `None` selects everything. Order is preserved, so with the gene-major
/// product a shard's keys stay sorted by gene.
pub fn shard_keys(keys: Vec<GeneRegion>, shard: Option<Shard>) -> Vec<GeneRegion> {
    match shard {
        None => keys,
        Some(s) => keys
            .into_iter()
            .enumerate()
            .filter(|(i, _)| s.contains_index(*i))
            .map(|(_, key)| key)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn product(genes: usize, regions: usize) -> Vec<GeneRegion> {
        (0..genes)
            .flat_map(|g| (0..regions).map(move |r| GeneRegion::new(format!("G{g}"), format!("R{r}"))))
            .collect()
    }

    #[test]
    fn shards_partition_the_product() {
        let all = product(5, 3);
        let mut seen: HashSet<GeneRegion> = HashSet::new();
        let mut total = 0;
        for shard in Shard::all(4) {
            let keys = shard_keys(all.clone(), Some(shard));
            total += keys.len();
            seen.extend(keys);
        }
        assert_eq!(total, all.len());
        assert_eq!(seen, all.iter().cloned().collect());
    }

    #[test]
    fn shard_takes_every_nth_key() {
        let all = product(2, 3);
        let keys = shard_keys(all.clone(), Some(Shard::new(2, 3).unwrap()));
        assert_eq!(keys, vec![all[1].clone(), all[4].clone()]);
        assert_eq!(shard_keys(all.clone(), None), all);
    }

    #[test]
    fn more_shards_than_keys_leaves_some_empty() {
        let all = product(1, 2);
        assert!(shard_keys(all, Some(Shard::new(3, 3).unwrap())).is_empty());
    }
}
