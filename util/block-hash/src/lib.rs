use ahash::AHashMap;

/// Integer block coordinate `(xb, yb, zb)` in block units.
pub type BlockKey = [i64; 3];

/// Address returned for a key that could not be activated (pool full).
pub const INVALID_ADDRESS: i64 = -1;

/// A spatial hash map assigning dense pool addresses to block keys.
///
/// Addresses are handed out sequentially in activation order, so the pool
/// buffers addressed by this map stay dense in `[0, len)`.
#[derive(Debug, Clone)]
pub struct BlockHashMap {
	map: AHashMap<BlockKey, i64>,
	capacity: usize,
}

impl BlockHashMap {
	/// A map backing a pool of at most `capacity` blocks.
	pub fn with_capacity(capacity: usize) -> Self {
		Self { map: AHashMap::with_capacity(capacity), capacity }
	}

	/// Insert every new key and report, per input key in order, its pool
	/// address and whether this call activated it.
	///
	/// Keys already present (including earlier occurrences within the same
	/// batch) come back with their existing address and a zero mask. Keys
	/// that would overflow the pool come back as
	/// ([`INVALID_ADDRESS`], 0).
	pub fn activate(&mut self, keys: &[BlockKey]) -> (Vec<i64>, Vec<u8>) {
		let mut addresses = Vec::with_capacity(keys.len());
		let mut masks = Vec::with_capacity(keys.len());
		let mut dropped = 0usize;
		for key in keys {
			if let Some(&address) = self.map.get(key) {
				addresses.push(address);
				masks.push(0);
			} else if self.map.len() < self.capacity {
				let address = self.map.len() as i64;
				self.map.insert(*key, address);
				addresses.push(address);
				masks.push(1);
			} else {
				addresses.push(INVALID_ADDRESS);
				masks.push(0);
				dropped += 1;
			}
		}
		if dropped > 0 {
			log::warn!("block pool full ({} blocks), dropped {} keys", self.capacity, dropped);
		}
		(addresses, masks)
	}

	/// Pool address of an already-activated key.
	pub fn find(&self, key: &BlockKey) -> Option<i64> {
		self.map.get(key).copied()
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_activation_addresses_are_dense() {
		let mut map = BlockHashMap::with_capacity(8);
		let keys = [[0, 0, 0], [1, 0, 0], [0, 1, 0]];
		let (addresses, masks) = map.activate(&keys);
		assert_eq!(addresses, vec![0, 1, 2]);
		assert_eq!(masks, vec![1, 1, 1]);
		assert_eq!(map.len(), 3);
	}

	#[test]
	fn test_duplicate_batch_activates_first_occurrence() {
		let mut map = BlockHashMap::with_capacity(8);
		let keys = [[0, 0, 0], [1, 1, 1], [0, 0, 0], [1, 1, 1]];
		let (addresses, masks) = map.activate(&keys);
		assert_eq!(addresses, vec![0, 1, 0, 1]);
		assert_eq!(masks, vec![1, 1, 0, 0]);
		assert_eq!(map.len(), 2);
	}

	#[test]
	fn test_reactivation_keeps_address() {
		let mut map = BlockHashMap::with_capacity(8);
		let (first, _) = map.activate(&[[3, -2, 7]]);
		let (second, masks) = map.activate(&[[3, -2, 7]]);
		assert_eq!(first, second);
		assert_eq!(masks, vec![0]);
	}

	#[test]
	fn test_capacity_saturation_drops_keys() {
		let mut map = BlockHashMap::with_capacity(2);
		assert_eq!(map.capacity(), 2);
		let keys = [[0, 0, 0], [1, 0, 0], [2, 0, 0]];
		let (addresses, masks) = map.activate(&keys);
		assert_eq!(addresses, vec![0, 1, INVALID_ADDRESS]);
		assert_eq!(masks, vec![1, 1, 0]);
		assert_eq!(map.len(), 2);
		assert_eq!(map.capacity(), 2);
	}

	#[test]
	fn test_find_after_activate() {
		let mut map = BlockHashMap::with_capacity(4);
		map.activate(&[[-1, -1, -1], [0, 0, 0]]);
		assert_eq!(map.find(&[-1, -1, -1]), Some(0));
		assert_eq!(map.find(&[0, 0, 0]), Some(1));
		assert_eq!(map.find(&[5, 5, 5]), None);
	}
}
