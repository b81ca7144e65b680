//! End-to-end tests: engine configured from a JSON file over an asset
//! directory.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mg_engine::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(f32, f32);

fn write_config(dir: &std::path::Path, json: &str) -> std::path::PathBuf {
    let path = dir.join("engine.json");
    fs::write(&path, json).unwrap();
    path
}

#[test]
fn engine_from_config_file_serves_assets() {
    let dir = tempfile::tempdir().unwrap();
    let assets = dir.path().join("assets");
    fs::create_dir_all(assets.join("text")).unwrap();
    fs::write(assets.join("text").join("intro.txt"), "welcome").unwrap();
    fs::write(assets.join("blob.bin"), [1u8, 2, 3]).unwrap();

    let config = write_config(
        dir.path(),
        &format!(
            r#"{{
                "worker_threads": 2,
                "entity_capacity": 16,
                "log_filter": "warn",
                "asset_directories": [{:?}]
            }}"#,
            assets.display().to_string()
        ),
    );

    let engine = Engine::from_config_file(&config).unwrap();
    assert_eq!(engine.thread_pool().size(), 2);
    assert_eq!(engine.resources().num_files(), 2);
    assert!(!engine.resources().is_cached("text/intro.txt"));

    let intro = engine.resources().access::<TextResource>("text/intro.txt").unwrap();
    assert_eq!(intro.text(), "welcome");
    let blob = engine.resources().access::<RawResource>("blob.bin").unwrap();
    assert_eq!(&*blob.bytes(), &[1, 2, 3]);
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Engine::from_config_file(dir.path().join("absent.json")).unwrap_err();
    assert!(format!("{err:#}").contains("absent.json"));
}

#[test]
fn refresh_reloads_and_optionally_evicts() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("value.txt");
    fs::write(&file, "1").unwrap();

    let config = EngineConfig {
        worker_threads: 1,
        asset_directories: vec![dir.path().to_path_buf()],
        unload_all_unused_on_refresh: true,
        ..Default::default()
    };
    let engine = Engine::new(config).unwrap();

    let held = engine.resources().access::<TextResource>("value.txt").unwrap();
    assert_eq!(engine.refresh_resources(), 0);
    assert!(engine.resources().is_cached("value.txt"));
    drop(held);

    fs::write(&file, "2").unwrap();
    fs::File::options()
        .write(true)
        .open(&file)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();

    // Reloaded, then evicted because nothing holds it.
    assert_eq!(engine.refresh_resources(), 1);
    assert!(!engine.resources().is_cached("value.txt"));
    assert_eq!(
        engine.resources().access::<TextResource>("value.txt").unwrap().text(),
        "2"
    );
}

#[test]
fn preload_counts_successes() {
    let files = MemoryFileLoader::new("mem");
    for i in 0..10 {
        files.insert(format!("file-{i}.txt"), format!("contents {i}"), TimeStamp(1));
    }
    files.insert("broken.txt", vec![0xffu8], TimeStamp(1));

    let config = EngineConfig {
        worker_threads: 3,
        ..Default::default()
    };
    let engine = Engine::with_loaders(config, vec![Box::new(files)]).unwrap();

    let mut ids: Vec<String> = (0..10).map(|i| format!("file-{i}.txt")).collect();
    ids.push("broken.txt".to_string());
    ids.push("absent.txt".to_string());

    assert_eq!(engine.preload::<TextResource>(ids), 10);
    assert!(engine.resources().is_cached("file-9.txt"));
    assert!(!engine.resources().is_cached("broken.txt"));
}

#[test]
fn preloaded_assets_keep_their_type() {
    let files = MemoryFileLoader::new("mem");
    files.insert("intro.txt", "hello", TimeStamp(1));
    files.insert("blob.bin", vec![7u8, 8], TimeStamp(1));
    let engine = Engine::with_loaders(
        EngineConfig {
            worker_threads: 2,
            ..Default::default()
        },
        vec![Box::new(files)],
    )
    .unwrap();

    assert_eq!(engine.preload::<TextResource>(["intro.txt"]), 1);
    assert_eq!(engine.preload::<RawResource>(["blob.bin"]), 1);
    assert!(engine.resources().is_cached("intro.txt"));

    let intro = engine.resources().access::<TextResource>("intro.txt").unwrap();
    assert_eq!(intro.text(), "hello");
    let blob = engine.resources().access::<RawResource>("blob.bin").unwrap();
    assert_eq!(&*blob.bytes(), &[7, 8]);
}

#[test]
fn pool_jobs_can_share_the_cache() {
    let files = MemoryFileLoader::new("mem");
    files.insert("shared.txt", "abc", TimeStamp(1));
    let engine = Engine::with_loaders(
        EngineConfig {
            worker_threads: 4,
            ..Default::default()
        },
        vec![Box::new(files)],
    )
    .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(engine.resources());
            engine
                .thread_pool()
                .add_job(move || cache.access::<TextResource>("shared.txt").unwrap().text().len())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.wait(), Ok(3));
    }
}

#[test]
fn entities_live_in_the_engine() {
    let mut engine = Engine::new(EngineConfig {
        worker_threads: 1,
        entity_capacity: 4,
        ..Default::default()
    })
    .unwrap();

    let ecs = engine.entities_mut();
    let moving = ecs.create_entity();
    ecs.add_component(moving, Position(0.0, 0.0));
    ecs.add_component(moving, Velocity(1.0, 2.0));
    let still = ecs.create_entity();
    ecs.add_component(still, Position(5.0, 5.0));

    for (_, (pos, vel)) in ecs.get_with_mut::<(&mut Position, &Velocity)>() {
        pos.0 += vel.0;
        pos.1 += vel.1;
    }

    let ecs = engine.entities();
    assert_eq!(*ecs.get_component::<Position>(moving), Position(1.0, 2.0));
    assert_eq!(*ecs.get_component::<Position>(still), Position(5.0, 5.0));
    assert_eq!(ecs.num_entities(), 2);
}
