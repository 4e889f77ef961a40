use std::fs;
use std::path::PathBuf;

use imdl::config::{self, ConfigDoc};
use imdl::notify::{NoticeQueue, Severity};

#[test]
fn printed_config_loads_back_unchanged() {
    let mut doc = ConfigDoc::empty();
    doc.apply_override("download.output_dir=music").unwrap();
    doc.apply_override("tool.sha256=\"abc123\"").unwrap();
    let cfg = doc.app_config().unwrap();

    let printed = toml::to_string_pretty(&cfg).expect("render config");
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("imdl.toml");
    fs::write(&path, &printed).unwrap();

    let again = config::load(&path).unwrap().app_config().unwrap();
    assert_eq!(again.download.output_dir, PathBuf::from("music"));
    assert_eq!(again.tool.sha256.as_deref(), Some("abc123"));
    assert_eq!(again.notices.max_notices, cfg.notices.max_notices);
    assert_eq!(toml::to_string_pretty(&again).unwrap(), printed);
}

#[test]
fn overrides_apply_on_top_of_extended_files() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("base.toml"),
        "[notices]\nmax_notices = 8\ndisplay_secs = 1.0\n",
    )
    .unwrap();
    let child = tmp.path().join("imdl.toml");
    fs::write(&child, "extends = \"base.toml\"\n[ui]\ntick_ms = 16\n").unwrap();

    let mut doc = config::load_or_default(Some(&child)).unwrap();
    doc.apply_override("notices.max_notices=2").unwrap();
    let cfg = doc.app_config().unwrap();
    assert_eq!(cfg.ui.tick_ms, 16);
    assert_eq!(cfg.notices.display_secs, 1.0);
    assert_eq!(cfg.notices.max_notices, 2);

    let queue = NoticeQueue::new(&cfg.notices);
    queue.attach_surface();
    for i in 0..5 {
        queue.post(format!("n{i}"), Severity::Info);
    }
    let kept: Vec<_> = queue.snapshot().into_iter().map(|n| n.message).collect();
    assert_eq!(kept, vec!["n3", "n4"]);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let err = config::load_or_default(Some(&tmp.path().join("nope.toml"))).unwrap_err();
    assert!(err.to_string().contains("failed to read config"), "{err}");
}
