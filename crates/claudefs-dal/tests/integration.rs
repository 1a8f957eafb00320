//! End-to-end tests of configured drivers.
//!
//! Drivers are configured through a registry, the way a repository
//! selects them, and driven through full stream lifecycles.

mod common;

use std::fs;
use std::sync::Arc;

use claudefs_dal::mc::placement;
use claudefs_dal::mc::MAX_PUT_SIZE;
use claudefs_dal::{
    ConfigOption, DalError, DalRegistry, DalStream, FileErasureEngine, Geometry,
    MockErasureEngine, OpenParams, RepoDalConfig, StreamFlags,
};
use common::{handle, mc_format, mc_options, registry_with_engine};
use tempfile::tempdir;

fn geometry() -> Geometry {
    Geometry {
        n: 10,
        e: 2,
        num_pods: 4,
        num_cap: 4,
        scatter_width: 128,
    }
}

fn objid_on_pod(pod: u32, matching: bool) -> String {
    (0..)
        .map(|i| format!("ver.001/obj.{}", i))
        .find(|id| (placement::compute(id, &geometry()).pod == pod) == matching)
        .unwrap()
}

#[test]
fn test_posix_round_trip_via_registry() {
    let dir = tempdir().unwrap();
    let host = dir.path().to_string_lossy().into_owned();
    let registry = DalRegistry::with_builtins();
    let dal = registry
        .configure(&RepoDalConfig {
            dal: "POSIX".to_string(),
            options: vec![],
        })
        .unwrap();

    let mut s = DalStream::new(dal.clone(), handle("repo", &host, "a/b/c")).unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::write()).unwrap();
    s.put_all(b"first part, ").unwrap();
    s.put_all(b"second part").unwrap();
    s.sync().unwrap();
    s.close().unwrap();
    s.finish().unwrap();

    assert!(dir.path().join("repo/ns/a#b#c").is_file());

    let mut s = DalStream::new(dal, handle("repo", &host, "a/b/c")).unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::read().at_offset(6)).unwrap();
    let mut out = Vec::new();
    s.get_to_end(&mut out).unwrap();
    assert_eq!(out, b"part, second part");
    s.close().unwrap();
    s.delete().unwrap();
    assert!(!dir.path().join("repo/ns/a#b#c").exists());
}

#[test]
fn test_open_before_location_is_a_state_error() {
    let dir = tempdir().unwrap();
    let host = dir.path().to_string_lossy().into_owned();
    let registry = DalRegistry::with_builtins();
    let posix = registry
        .configure(&RepoDalConfig {
            dal: "POSIX".to_string(),
            options: vec![],
        })
        .unwrap();

    let mut s = DalStream::new(posix, handle("repo", &host, "obj")).unwrap();
    assert!(matches!(
        s.open(OpenParams::write()),
        Err(DalError::LocationNotComputed("POSIX"))
    ));
    assert!(!dir.path().join("repo/ns/obj").exists());

    let engine = MockErasureEngine::new();
    let registry = registry_with_engine(Arc::new(engine.clone()));
    let mc = registry
        .configure(&RepoDalConfig {
            dal: "MC".to_string(),
            options: mc_options(dir.path()),
        })
        .unwrap();
    let mut s = DalStream::new(mc, handle("repo", "/zfs/pod%d/block%s/cap%d/scatter%d", "obj"))
        .unwrap();
    assert!(matches!(
        s.open(OpenParams::write()),
        Err(DalError::LocationNotComputed("MC"))
    ));
    assert_eq!(engine.call_count(), 0);
}

#[test]
fn test_degraded_close_logs_one_line() {
    let logs = tempdir().unwrap();
    let engine = MockErasureEngine::new();
    engine.push_close_result(0x3);
    let registry = registry_with_engine(Arc::new(engine.clone()));
    let dal = registry
        .configure(&RepoDalConfig {
            dal: "MC".to_string(),
            options: mc_options(logs.path()),
        })
        .unwrap();

    let mut s = DalStream::new(
        dal,
        handle("repo10+2", "/zfs/pod%d/block%s/cap%d/scatter%d", "ver.001/obj.1"),
    )
    .unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::write()).unwrap();
    s.put_all(b"payload").unwrap();
    s.sync().unwrap();
    s.close().unwrap();
    s.finish().unwrap();

    let files: Vec<_> = walk(logs.path());
    assert_eq!(files.len(), 1);
    let text = fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split(' ').collect();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields[1], "10");
    assert_eq!(fields[2], "2");
    assert_eq!(fields[4], "3");
    assert_eq!(fields[5], "repo10+2");
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn test_lost_block_is_rebuilt_and_logged() {
    let root = tempdir().unwrap();
    let logs = tempdir().unwrap();
    let registry = registry_with_engine(Arc::new(FileErasureEngine::new()));
    let dal = registry
        .configure(&RepoDalConfig {
            dal: "MC".to_string(),
            options: mc_options(logs.path()),
        })
        .unwrap();
    let format = mc_format(root.path());
    let data: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();

    let mut s = DalStream::new(dal.clone(), handle("repo", &format, "big/object")).unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::write()).unwrap();
    s.put_all(&data).unwrap();
    s.sync().unwrap();
    s.close().unwrap();
    let p = s.placement().unwrap();
    let fh = s.finish().unwrap();

    // lose the first data block
    let lost = fh.os.url.replacen("%d", &p.start_block.to_string(), 1);
    fs::remove_file(&lost).unwrap();

    let mut s = DalStream::new(dal, handle("repo", &format, "big/object")).unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::read()).unwrap();
    let mut out = Vec::new();
    s.get_to_end(&mut out).unwrap();
    s.sync().unwrap();
    s.close().unwrap();
    s.finish().unwrap();
    assert_eq!(out, data);

    let files = walk(logs.path());
    assert_eq!(files.len(), 1);
    let text = fs::read_to_string(&files[0]).unwrap();
    let fields: Vec<&str> = text.trim_end().split(' ').collect();
    assert_eq!(fields[4], "1");
}

#[test]
fn test_fuzzy_write_rule_follows_pod() {
    let logs = tempdir().unwrap();
    let engine = MockErasureEngine::new();
    let registry = registry_with_engine(Arc::new(engine.clone()));
    let mut options = vec![
        ConfigOption::new("wrap", "MC"),
        ConfigOption::new(
            "rule",
            "which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1.0,ret=5",
        ),
    ];
    options.extend(mc_options(logs.path()));
    let dal = registry
        .configure(&RepoDalConfig {
            dal: "FUZZY".to_string(),
            options,
        })
        .unwrap();
    let format = "/zfs/pod%d/block%s/cap%d/scatter%d";

    for _ in 0..20 {
        let mut s = DalStream::new(dal.clone(), handle("repo", format, &objid_on_pod(2, true)))
            .unwrap();
        s.update_object_location().unwrap();
        s.open(OpenParams::write()).unwrap();
        let err = s.put(b"data").unwrap_err();
        assert!(matches!(err, DalError::Injected { code: 5 }));
        assert_eq!(err.status(), 5);
        s.close().unwrap();
    }

    let mut s =
        DalStream::new(dal, handle("repo", format, &objid_on_pod(2, false))).unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::write()).unwrap();
    assert_eq!(s.put(b"data").unwrap(), 4);
    s.sync().unwrap();
    s.close().unwrap();
}

#[test]
fn test_close_twice_is_a_no_op() {
    let dir = tempdir().unwrap();
    let registry = registry_with_engine(Arc::new(MockErasureEngine::new()));
    let host = dir.path().to_string_lossy().into_owned();

    for (name, options, host) in [
        ("POSIX", vec![], host.clone()),
        ("OBJECT", vec![], "objects.example".to_string()),
        ("NO_OP", vec![], host.clone()),
        (
            "MC",
            mc_options(dir.path()),
            "/zfs/pod%d/block%s/cap%d/scatter%d".to_string(),
        ),
    ] {
        let dal = registry
            .configure(&RepoDalConfig {
                dal: name.to_string(),
                options,
            })
            .unwrap();
        let mut s = DalStream::new(dal, handle("repo", &host, "obj")).unwrap();
        s.update_object_location().unwrap();
        s.open(OpenParams::write()).unwrap();
        s.put_all(b"x").unwrap();
        s.sync().unwrap();
        s.close().unwrap();
        s.close().unwrap();
        s.finish().unwrap();
    }
}

#[test]
fn test_oversized_put_never_reaches_engine() {
    let dir = tempdir().unwrap();
    let engine = MockErasureEngine::new();
    let registry = registry_with_engine(Arc::new(engine.clone()));
    let dal = registry
        .configure(&RepoDalConfig {
            dal: "MC".to_string(),
            options: mc_options(dir.path()),
        })
        .unwrap();
    let mut s = DalStream::new(dal, handle("repo", "/zfs/pod%d/block%s/cap%d/scatter%d", "obj"))
        .unwrap();
    s.update_object_location().unwrap();
    s.open(OpenParams::write()).unwrap();
    let calls = engine.call_count();

    // zeroed allocation; the pages are never touched
    let huge = vec![0u8; MAX_PUT_SIZE + 1];
    assert!(matches!(
        s.put(&huge),
        Err(DalError::WriteTooLarge { size, limit }) if size == MAX_PUT_SIZE + 1 && limit == MAX_PUT_SIZE
    ));
    assert_eq!(engine.call_count(), calls);
    assert!(!s.handle().os.flags.contains(StreamFlags::ERRORS));
}

#[test]
fn test_dynamic_module_without_entry_points_is_refused() {
    let registry = DalRegistry::with_builtins();
    let before = registry.len();
    let err = registry.lookup("DYNAMIC libc.so.6").unwrap_err();
    assert!(matches!(err, DalError::DynamicLoad { .. }));
    assert_eq!(registry.len(), before);
}

#[test]
fn test_repo_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo.json");
    fs::write(
        &path,
        r#"{"dal": "MC_SOCKETS", "options": [
            {"key": "n", "value": 4}, {"key": "e", "value": 1},
            {"key": "num_pods", "value": 2}, {"key": "num_cap", "value": 1},
            {"key": "scatter_width", "value": "8"},
            {"key": "degraded_log_dir", "value": "/tmp"},
            {"key": "host_count", "value": 4}, {"key": "blocks_per_host", "value": 3},
            {"key": "host_offset", "value": 100}
        ]}"#,
    )
    .unwrap();
    let cfg = RepoDalConfig::from_file(&path).unwrap();
    let engine = MockErasureEngine::new();
    let registry = registry_with_engine(Arc::new(engine.clone()));
    let dal = registry.configure(&cfg).unwrap();
    assert_eq!(dal.name(), "MC_SOCKETS");

    let mut s = DalStream::new(
        dal,
        handle("repo", "10.0.0.%%d:1200/pod%d/block%%d/cap%d/scatter%d", "obj"),
    )
    .unwrap();
    s.update_object_location().unwrap();
    assert!(s.handle().os.url.starts_with("10.0.0.%d:1200/pod"));
    s.open(OpenParams::write()).unwrap();
    s.put_all(b"sockets").unwrap();
    s.sync().unwrap();
    s.close().unwrap();
    assert_eq!(
        engine.object(&s.handle().os.url).unwrap(),
        b"sockets".to_vec()
    );
}
