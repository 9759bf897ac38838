use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::vector::FeatureVector;

/// 图片内容指纹，即原始字节的 blake3 哈希
pub type Fingerprint = [u8; 32];

pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    *blake3::hash(bytes).as_bytes()
}

/// 同一张图片在开启、关闭增强时得到的特征不同，因此增强开关也是键的一部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    fingerprint: Fingerprint,
    augment: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, (FeatureVector, u64)>,
    /// 访问序号 -> 键，序号最小的为最久未使用
    lru_order: BTreeMap<u64, CacheKey>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, key: &CacheKey) -> Option<FeatureVector> {
        let tick = self.next_tick();
        let (vector, last) = self.entries.get_mut(key)?;
        self.lru_order.remove(&*last);
        self.lru_order.insert(tick, *key);
        *last = tick;
        Some(vector.clone())
    }

    fn insert(&mut self, key: CacheKey, vector: FeatureVector, capacity: usize) {
        let tick = self.next_tick();
        if let Some((_, last)) = self.entries.insert(key, (vector, tick)) {
            self.lru_order.remove(&last);
        }
        self.lru_order.insert(tick, key);
        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.lru_order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

/// 查询特征缓存
///
/// 以图片内容指纹为键的有界 LRU 缓存。锁只保护缓存自身的读写，特征提取在锁外进行，
/// 因此不同图片的提取可以并发；同一张图片同时未命中时可能被重复计算，结果相同。
pub struct QueryCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// 容量为 0 时不缓存任何结果
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get_or_compute<F>(&self, bytes: &[u8], augment: bool, compute: F) -> Result<FeatureVector>
    where
        F: FnOnce(&[u8]) -> Result<FeatureVector>,
    {
        let key = CacheKey { fingerprint: fingerprint(bytes), augment };

        if let Some(vector) = self.state.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("缓存命中: {}", blake3::Hash::from(key.fingerprint).to_hex());
            return Ok(vector);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let vector = compute(bytes)?;
        if self.capacity > 0 {
            self.state.lock().insert(key, vector.clone(), self.capacity);
        }
        Ok(vector)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
