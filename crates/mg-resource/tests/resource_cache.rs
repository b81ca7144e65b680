//! Integration tests for the resource cache: dependencies, hot reload from
//! disk, and concurrent access.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use mg_resource::prelude::*;
use parking_lot::Mutex;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A resource whose file names one other text resource it depends on.
struct Material {
    albedo: ResourceHandle<TextResource>,
}

impl Resource for Material {
    const TYPE_ID: &'static str = "material";

    fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
        let texture = input.resource_data_as_text()?.trim().to_owned();
        Ok(Material {
            albedo: input.load_dependency::<TextResource>(texture)?,
        })
    }
}

/// Follows a chain of file names until it reaches a file named "end".
#[derive(Debug)]
struct Chain;

impl Resource for Chain {
    const TYPE_ID: &'static str = "chain";

    fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
        let next = input.resource_data_as_text()?.trim().to_owned();
        if next != "end" {
            input.load_dependency::<Chain>(next)?;
        }
        Ok(Chain)
    }
}

fn memory_cache(files: &[(&str, &str, u64)]) -> ResourceCache {
    let loader = MemoryFileLoader::new("mem");
    for &(name, text, ts) in files {
        loader.insert(name, text, TimeStamp(ts));
    }
    ResourceCache::new(vec![Box::new(loader)], ResourceCacheConfig::default())
}

#[test]
fn dependency_change_reloads_dependent() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("brick.mat"), "brick.tex").unwrap();
    fs::write(dir.path().join("brick.tex"), "red").unwrap();

    let cache = ResourceCache::new(
        vec![Box::new(DirectoryLoader::new(dir.path()))],
        ResourceCacheConfig::default(),
    );
    let reloaded = Arc::new(Mutex::new(Vec::new()));
    let sink = reloaded.clone();
    cache.add_reload_observer(move |event| sink.lock().push(event.resource.id().to_string()));

    {
        let material = cache.access::<Material>("brick.mat").unwrap();
        assert_eq!(cache.access_handle(&material.albedo).unwrap().text(), "red");
    }
    assert!(cache.is_cached("brick.tex"));

    let texture = dir.path().join("brick.tex");
    fs::write(&texture, "blue").unwrap();
    fs::File::options()
        .write(true)
        .open(&texture)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();

    assert_eq!(cache.refresh(), 2);
    assert_eq!(*reloaded.lock(), vec!["brick.tex", "brick.mat"]);

    let material = cache.access::<Material>("brick.mat").unwrap();
    assert_eq!(cache.access_handle(&material.albedo).unwrap().text(), "blue");

    // Nothing changed since the last refresh.
    assert_eq!(cache.refresh(), 0);
}

#[test]
fn directory_names_use_forward_slashes() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("subdirectory")).unwrap();
    fs::write(dir.path().join("subdirectory").join("test-file-4.txt"), "four").unwrap();
    fs::write(dir.path().join("test-file-1.txt"), "one").unwrap();

    let cache = ResourceCache::new(
        vec![Box::new(DirectoryLoader::new(dir.path()))],
        ResourceCacheConfig::default(),
    );
    assert_eq!(cache.num_files(), 2);
    assert!(cache.file_exists("subdirectory/test-file-4.txt"));
    assert_eq!(
        cache
            .access::<TextResource>("subdirectory/test-file-4.txt")
            .unwrap()
            .text(),
        "four"
    );
    assert_eq!(
        cache.file_loaders()[0].name(),
        dir.path().display().to_string()
    );
}

#[test]
fn missing_dependency_fails_the_load() {
    let cache = memory_cache(&[("wood.mat", "wood.tex", 1)]);
    match cache.access::<Material>("wood.mat") {
        Err(ResourceError::LoadFailed {
            source: LoadResourceError::DependencyNotFound { dependency },
            ..
        }) => assert_eq!(dependency.as_str(), "wood.tex"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(!cache.is_cached("wood.mat"));
}

#[test]
fn dependency_chain_loads_every_link() {
    let cache = memory_cache(&[("a", "b", 1), ("b", "c", 1), ("c", "end", 1)]);
    cache.access::<Chain>("a").unwrap();
    for id in ["a", "b", "c"] {
        assert!(cache.is_cached(id), "{id} should be loaded");
    }
}

#[test]
fn dependency_cycle_is_reported() {
    let cache = memory_cache(&[("a", "b", 1), ("b", "a", 1), ("self", "self", 1)]);

    let err = cache.access::<Chain>("a").unwrap_err();
    assert!(matches!(
        err,
        ResourceError::LoadFailed {
            source: LoadResourceError::DependencyFailed { .. },
            ..
        }
    ));
    assert!(!cache.is_cached("a") && !cache.is_cached("b"));

    assert!(cache.access::<Chain>("self").is_err());
}

#[test]
fn concurrent_access_loads_once() {
    static LOADS: AtomicUsize = AtomicUsize::new(0);

    struct Slow(u32);
    impl Resource for Slow {
        const TYPE_ID: &'static str = "slow";
        fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
            LOADS.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok(Slow(input.resource_data().len() as u32))
        }
    }

    let cache = memory_cache(&[("slow.bin", "12345", 1), ("other.txt", "x", 1)]);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let slow = cache.access::<Slow>("slow.bin").unwrap();
                assert_eq!(slow.0, 5);
                assert_eq!(cache.access::<TextResource>("other.txt").unwrap().text(), "x");
            });
        }
    });
    assert_eq!(LOADS.load(Ordering::SeqCst), 1);
}

#[test]
fn handles_survive_unload_and_reload_on_access() {
    let cache = memory_cache(&[("note.txt", "remember", 1)]);
    let handle = cache.resource_handle::<TextResource>("note.txt", false).unwrap();
    assert!(!handle.is_loaded());

    {
        let guard = cache.access_handle(&handle).unwrap();
        assert_eq!(guard.text(), "remember");
        assert_eq!(guard.time_stamp(), TimeStamp(1));
        assert_eq!(handle.ref_count(), 1);
        assert!(!cache.unload_unused(true));
    }

    assert_eq!(handle.ref_count(), 0);
    assert!(cache.unload_unused(true));
    assert!(!handle.is_loaded());
    assert_eq!(cache.access_handle(&handle).unwrap().text(), "remember");
}
