use mg_memory::HeapBox;
use parking_lot::MappedMutexGuard;

use crate::error::LoadResourceError;
use crate::resource::{LoadingInput, Resource};

/// Uninterpreted file contents, kept in the cache's shared heap.
///
/// Reading the bytes locks the heap; release the returned guard before
/// loading further resources on the same thread.
#[derive(Debug)]
pub struct RawResource {
    data: HeapBox<[u8]>,
}

impl RawResource {
    pub fn bytes(&self) -> MappedMutexGuard<'_, [u8]> {
        self.data.lock_slice()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Resource for RawResource {
    const TYPE_ID: &'static str = "raw";

    fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
        let data = input.heap().alloc_copy(input.resource_data())?;
        Ok(RawResource { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn raw_bytes_live_in_the_heap() {
        let files = MemoryFileLoader::new("mem");
        files.insert("blob.bin", vec![1u8, 2, 3, 4, 5], TimeStamp(1));
        let cache = ResourceCache::new(vec![Box::new(files)], ResourceCacheConfig::default());

        let used_before = cache.heap().num_used_bytes();
        {
            let raw = cache.access::<RawResource>("blob.bin").unwrap();
            assert_eq!(raw.len(), 5);
            assert_eq!(&*raw.bytes(), &[1, 2, 3, 4, 5]);
        }
        assert!(cache.heap().num_used_bytes() > used_before);

        assert!(cache.unload_unused(true));
        assert_eq!(cache.heap().num_used_bytes(), used_before);
    }

    #[test]
    fn oversized_file_is_an_allocation_failure() {
        let files = MemoryFileLoader::new("mem");
        files.insert("big.bin", vec![0u8; 4096], TimeStamp(1));
        let config = ResourceCacheConfig {
            heap_bytes: 1024,
            ..ResourceCacheConfig::default()
        };
        let cache = ResourceCache::new(vec![Box::new(files)], config);

        let err = cache.access::<RawResource>("big.bin").unwrap_err();
        assert!(matches!(
            err,
            ResourceError::LoadFailed {
                source: LoadResourceError::AllocationFailure(_),
                ..
            }
        ));
    }
}
