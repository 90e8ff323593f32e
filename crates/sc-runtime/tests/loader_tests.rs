//! ScriptLoader tests
//!
//! - Discovery and `_`-segment skipping
//! - Entry resolution by naming convention
//! - Manifest module selection and failure modes
//! - mtime-based hot reload and unload

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sc_runtime::{ScriptError, ScriptLoader, ScriptModule, ScriptRegistry};

fn registry_with(modules: &[(&str, &[&str])]) -> Arc<ScriptRegistry> {
    let registry = ScriptRegistry::new();
    for (module, functions) in modules {
        let functions: Vec<String> = functions.iter().map(|f| f.to_string()).collect();
        registry.register(module, move || {
            let mut m = ScriptModule::new();
            for name in &functions {
                m = m.function(name, |_ctx| Ok(()));
            }
            m
        });
    }
    Arc::new(registry)
}

#[test]
fn discovery_skips_underscore_segments_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("tools")).unwrap();
    fs::create_dir_all(dir.path().join("_drafts")).unwrap();
    fs::write(dir.path().join("zeta.toml"), "").unwrap();
    fs::write(dir.path().join("tools/cleanup.toml"), "").unwrap();
    fs::write(dir.path().join("_hidden.toml"), "").unwrap();
    fs::write(dir.path().join("_drafts/wip.toml"), "").unwrap();
    fs::write(dir.path().join("notes.txt"), "").unwrap();

    let loader = ScriptLoader::new(dir.path(), registry_with(&[]));
    assert_eq!(
        loader.list_available_scripts(),
        vec!["tools/cleanup".to_string(), "zeta".to_string()]
    );
}

#[test]
fn entry_resolution_follows_convention_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("demo.toml"), "module = \"m\"\n").unwrap();

    // "chain" wins over the basename.
    let registry = registry_with(&[("m", &["demo", "chain"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);
    loader.load_script("demo", true).unwrap();
    assert_eq!(loader.script_info("demo").unwrap().entry_name, "chain");

    // Without "chain"/"main", the basename is used.
    let registry = registry_with(&[("m", &["demo", "demo_chain"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);
    loader.load_script("demo", true).unwrap();
    assert_eq!(loader.script_info("demo").unwrap().entry_name, "demo");
}

#[test]
fn nested_scripts_resolve_flattened_names() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("tools")).unwrap();
    fs::write(dir.path().join("tools/cleanup.toml"), "module = \"m\"\n").unwrap();

    let registry = registry_with(&[("m", &["tools_cleanup_chain"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);
    loader.load_script("tools/cleanup", true).unwrap();
    assert_eq!(
        loader.script_info("tools/cleanup").unwrap().entry_name,
        "tools_cleanup_chain"
    );
}

#[test]
fn manifest_module_defaults_to_flattened_name() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("pack")).unwrap();
    fs::write(dir.path().join("pack/station.toml"), "").unwrap();

    let registry = registry_with(&[("pack_station", &["chain"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);
    loader.load_script("pack/station", true).unwrap();
    assert_eq!(loader.script_info("pack/station").unwrap().module, "pack_station");
}

#[test]
fn load_failures_are_structured() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("known.toml"), "module = \"missing\"\n").unwrap();
    fs::write(dir.path().join("broken.toml"), "module = [not toml\n").unwrap();
    fs::write(dir.path().join("empty.toml"), "module = \"m\"\n").unwrap();

    let registry = registry_with(&[("m", &["unrelated_fn"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);

    assert!(matches!(
        loader.load_script("absent", true),
        Err(ScriptError::NotFound { .. })
    ));
    assert!(matches!(
        loader.load_script("known", true),
        Err(ScriptError::UnknownModule { .. })
    ));
    assert!(matches!(
        loader.load_script("broken", true),
        Err(ScriptError::Manifest { .. })
    ));
    match loader.load_script("empty", true) {
        Err(ScriptError::NoEntryFunction { candidates, .. }) => {
            assert_eq!(candidates[0], "chain");
            assert!(candidates.contains(&"empty".to_string()));
        }
        other => panic!("expected NoEntryFunction, got {:?}", other.err()),
    }
}

#[test]
fn non_forced_load_reuses_fresh_cache() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("demo.toml"), "module = \"m\"\n").unwrap();

    let instantiations = Arc::new(AtomicUsize::new(0));
    let registry = ScriptRegistry::new();
    let counter = Arc::clone(&instantiations);
    registry.register("m", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ScriptModule::new().function("chain", |_ctx| Ok(()))
    });

    let mut loader = ScriptLoader::new(dir.path(), Arc::new(registry));
    let after_preload = instantiations.load(Ordering::SeqCst);

    loader.load_script("demo", false).unwrap();
    assert_eq!(instantiations.load(Ordering::SeqCst), after_preload);

    // A forced load instantiates a fresh module.
    loader.load_script("demo", true).unwrap();
    assert_eq!(instantiations.load(Ordering::SeqCst), after_preload + 1);
}

#[test]
fn check_for_updates_reloads_changed_and_unloads_missing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.toml"), "module = \"m\"\n").unwrap();
    fs::write(dir.path().join("b.toml"), "module = \"m\"\n").unwrap();

    let registry = registry_with(&[("m", &["chain"])]);
    let mut loader = ScriptLoader::new(dir.path(), registry);
    assert!(loader.check_for_updates().is_empty());

    // Touch one file; mtime must advance past filesystem granularity.
    thread::sleep(Duration::from_millis(50));
    fs::write(dir.path().join("a.toml"), "module = \"m\"\n# touched\n").unwrap();
    assert_eq!(loader.check_for_updates(), vec!["a".to_string()]);

    fs::remove_file(dir.path().join("b.toml")).unwrap();
    assert!(loader.check_for_updates().is_empty());
    assert!(loader.script_info("b").is_none());
    assert!(loader.script_info("a").is_some());
}
