// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use smf_core::cfg::config::Config;

const SAMPLE_YAML: &str = r#"
ipt:
  MasterAddress: "127.0.0.1:9000"
  AccountName: "gw1"
  AccountPwd: "secret"
sml:
  TrxPrefix: "smf"
mbus:
  Mode: "wireless-mbus"
storage:
  Backend: "memory"
brokers:
  - Name: "primary"
    Kind: "on-demand"
    Address: "127.0.0.1:9100"
    WriteTimeout: 2
push:
  - Meter: "meter-1"
    Nr: 1
    Profile: "15-min"
    Target: "primary"
logging:
  Level: "info"
"#;

static FIXTURE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Writes `contents` to a uniquely-named file under the OS temp dir and
/// removes it on drop.
struct Fixture(PathBuf);

impl Fixture {
    fn new(contents: &str) -> Self {
        let n = FIXTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("smf-config-test-{}-{n}.yaml", std::process::id()));
        std::fs::File::create(&path).and_then(|mut f| f.write_all(contents.as_bytes())).expect("write fixture config");
        Fixture(path)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn load_from_file_parses_every_top_level_section() {
    let fixture = Fixture::new(SAMPLE_YAML);
    let cfg = Config::load_from_file(fixture.path()).expect("config should load");

    assert_eq!(cfg.ipt.account_name, "gw1");
    assert_eq!(cfg.brokers.len(), 1);
    assert_eq!(cfg.brokers[0].name, "primary");
    assert_eq!(cfg.push.len(), 1);
    assert_eq!(cfg.push[0].meter, "meter-1");
    assert_eq!(cfg.storage.backend, "memory");
}

#[test]
fn load_from_file_rejects_empty_account_name() {
    let broken = SAMPLE_YAML.replace(r#"AccountName: "gw1""#, r#"AccountName: """#);
    let fixture = Fixture::new(&broken);
    assert!(Config::load_from_file(fixture.path()).is_err());
}
