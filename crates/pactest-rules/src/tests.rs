use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use pactest_core::{
    build_package_archive, set_fixed_times, Database, FilesystemSnapshot,
    InstallReason, Package, RootLayout, Tree, FIXTURE_MTIME,
};

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_layout() -> RootLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "pactest-rules-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    RootLayout::new(path)
}

struct Fixture {
    layout: RootLayout,
    databases: BTreeMap<Tree, Database>,
    local_packages: Vec<Package>,
    snapshot: FilesystemSnapshot,
    log: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let layout = test_layout();
        layout.ensure_base_dirs().expect("must create dirs");

        let mut installed = Package::with_version("dummy", "1.0-2");
        installed.desc = "a dummy".to_string();
        installed.epoch = 1;
        installed.reason = InstallReason::Dependency;
        installed.groups = vec!["base".to_string()];
        installed.license = vec!["GPL".to_string()];
        installed.depends = vec!["libfoo>=2".parse().expect("must parse")];
        installed.provides = vec!["dummy-bin".parse().expect("must parse")];
        installed.add_file("etc/dummy.conf").expect("must add file");
        installed.add_file("usr/bin/dummy").expect("must add file");
        installed.add_backup("etc/dummy.conf").expect("must add backup");

        let mut local = Database::new(Tree::Local);
        local.add(installed.clone()).expect("must add");
        local.write_all(&layout).expect("must write local db");

        let mut sync_pkg = Package::new("fresh");
        build_package_archive(&mut sync_pkg, &layout.cache_dir()).expect("must build archive");
        let mut sync = Database::new(Tree::Sync("core".to_string()));
        sync.add(sync_pkg).expect("must add");

        for file in &installed.files {
            let path = file.materialize(layout.root()).expect("must materialize");
            set_fixed_times(&path, FIXTURE_MTIME).expect("must stamp");
        }
        let snapshot = FilesystemSnapshot::capture(layout.root()).expect("must snapshot");

        let log = layout.log_file();
        fs::write(&log, "checking dependencies...\nerror: failed to commit transaction\n")
            .expect("must write log");

        let mut databases = BTreeMap::new();
        databases.insert(Tree::Local, local);
        databases.insert(Tree::Sync("core".to_string()), sync);

        Self {
            layout,
            databases,
            local_packages: vec![Package::new("standalone")],
            snapshot,
            log,
        }
    }

    fn context(&self, exit_code: i32) -> EvalContext<'_> {
        EvalContext {
            layout: &self.layout,
            exit_code,
            output_log: Some(&self.log),
            databases: &self.databases,
            local_packages: &self.local_packages,
            snapshot: &self.snapshot,
        }
    }

    fn eval(&self, raw: &str) -> Outcome {
        Rule::parse(raw)
            .evaluate(&self.context(0))
            .expect("rule must evaluate")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(self.layout.root());
    }
}

fn skip_reason(raw: &str) -> Option<SkipReason> {
    match Rule::parse(raw).assertion() {
        Assertion::Unevaluable(reason) => Some(reason.clone()),
        _ => None,
    }
}

#[test]
fn parse_splits_negation_kind_case_and_argument() {
    let rule = Rule::parse("!PKG_VERSION=dummy|1.0-1");
    assert!(rule.is_negated());
    assert_eq!(rule.raw(), "!PKG_VERSION=dummy|1.0-1");
    match rule.assertion() {
        Assertion::PkgEquals { name, field, value } => {
            assert_eq!(name, "dummy");
            assert_eq!(*field, PkgScalar::Version);
            assert_eq!(value, "1.0-1");
        }
        other => panic!("unexpected assertion {other:?}"),
    }

    match Rule::parse("FILE_CONTENTS=etc/motd|a=b|c").assertion() {
        Assertion::FileContents { path, contents } => {
            assert_eq!(path, "etc/motd");
            assert_eq!(contents, "a=b|c");
        }
        other => panic!("unexpected assertion {other:?}"),
    }

    match Rule::parse("FILE_MODE=bin/tool|755").assertion() {
        Assertion::FileMode { mode, .. } => assert_eq!(*mode, 0o755),
        other => panic!("unexpected assertion {other:?}"),
    }
}

#[test]
fn parse_classifies_unrecognized_and_malformed_rules() {
    assert_eq!(skip_reason("FOO_BAR=x"), Some(SkipReason::Unrecognized));
    assert_eq!(skip_reason("PKG_COLOR=dummy|red"), Some(SkipReason::Unrecognized));
    assert!(matches!(skip_reason("PKG_EXIST"), Some(SkipReason::Malformed(_))));
    assert!(matches!(skip_reason("PKGEXIST=dummy"), Some(SkipReason::Malformed(_))));
    assert!(matches!(
        skip_reason("PACMAN_RETCODE=zero"),
        Some(SkipReason::Malformed(_))
    ));
    assert!(matches!(
        skip_reason("PACMAN_OUTPUT=(unclosed"),
        Some(SkipReason::Malformed(_))
    ));
    assert!(matches!(
        skip_reason("PKG_VERSION=dummy"),
        Some(SkipReason::Malformed(_))
    ));
    assert!(matches!(
        skip_reason("PKG_REASON=dummy|explicit"),
        Some(SkipReason::Malformed(_))
    ));
    assert!(matches!(
        skip_reason("FILE_TYPE=etc|socket"),
        Some(SkipReason::Malformed(_))
    ));
    assert!(matches!(
        skip_reason("FILE_MODE=etc/x|rwx"),
        Some(SkipReason::Malformed(_))
    ));
    assert_eq!(skip_reason("PKG_EXIST=dummy"), None);
}

#[test]
fn negation_inverts_pass_and_fail_but_not_undetermined() {
    assert_eq!(Outcome::Pass.negate(), Outcome::Fail);
    assert_eq!(Outcome::Fail.negate(), Outcome::Pass);
    assert_eq!(
        Outcome::Undetermined(SkipReason::Unrecognized).negate(),
        Outcome::Undetermined(SkipReason::Unrecognized)
    );

    let fixture = Fixture::new();
    assert_eq!(fixture.eval("!PKG_EXIST=dummy"), Outcome::Fail);
    assert_eq!(fixture.eval("!PKG_EXIST=ghost"), Outcome::Pass);
    assert_eq!(
        fixture.eval("!FOO_BAR=x"),
        Outcome::Undetermined(SkipReason::Unrecognized)
    );
}

#[test]
fn retcode_and_output_rules_observe_the_run() {
    let fixture = Fixture::new();
    let ctx = fixture.context(1);
    let check = |raw: &str| Rule::parse(raw).evaluate(&ctx).expect("must evaluate");

    assert_eq!(check("PACMAN_RETCODE=1"), Outcome::Pass);
    assert_eq!(check("PACMAN_RETCODE=0"), Outcome::Fail);
    assert_eq!(check("PACMAN_OUTPUT=failed to commit"), Outcome::Pass);
    assert_eq!(check("PACMAN_OUTPUT=^checking"), Outcome::Pass);
    assert_eq!(check("PACMAN_OUTPUT=warning:"), Outcome::Fail);

    let mut uncaptured = fixture.context(1);
    uncaptured.output_log = None;
    assert_eq!(
        Rule::parse("PACMAN_OUTPUT=error")
            .evaluate(&uncaptured)
            .expect("must evaluate"),
        Outcome::Undetermined(SkipReason::OutputUnavailable)
    );
}

#[test]
fn package_rules_read_the_local_database() {
    let fixture = Fixture::new();

    assert_eq!(fixture.eval("PKG_EXIST=dummy"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_VERSION=dummy|1:1.0-2"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_VERSION=dummy|1.0-2"), Outcome::Fail);
    assert_eq!(fixture.eval("PKG_EPOCH=dummy|1"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_DESC=dummy|a dummy"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_REASON=dummy|1"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_GROUPS=dummy|base"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_LICENSE=dummy|GPL"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_DEPENDS=dummy|libfoo>=2"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_DEPENDS=dummy|libfoo"), Outcome::Fail);
    assert_eq!(fixture.eval("PKG_PROVIDES=dummy|dummy-bin"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_CONFLICTS=dummy|other"), Outcome::Fail);
    assert_eq!(fixture.eval("PKG_FILES=dummy|usr/bin/dummy"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_FILES=dummy|usr/bin/"), Outcome::Fail);
    assert_eq!(fixture.eval("PKG_BACKUP=dummy|etc/dummy.conf"), Outcome::Pass);
    assert_eq!(fixture.eval("PKG_MODIFIED=dummy"), Outcome::Fail);
}

#[test]
fn package_rules_on_absent_packages_fail() {
    let fixture = Fixture::new();
    for raw in [
        "PKG_EXIST=ghost",
        "PKG_MODIFIED=ghost",
        "PKG_VERSION=ghost|1.0-1",
        "PKG_FILES=ghost|usr/bin/ghost",
        "PKG_BACKUP=ghost|etc/ghost.conf",
    ] {
        assert_eq!(fixture.eval(raw), Outcome::Fail, "{raw}");
    }
}

#[test]
fn pkg_modified_detects_rewritten_entries() {
    let fixture = Fixture::new();
    let desc = fixture
        .layout
        .local_db_dir()
        .join("dummy-1:1.0-2")
        .join("desc");
    let mut content = fs::read_to_string(&desc).expect("must read desc");
    content.push_str("%PACKAGER%\nsomeone\n\n");
    fs::write(&desc, content).expect("must rewrite desc");

    assert_eq!(fixture.eval("PKG_MODIFIED=dummy"), Outcome::Pass);
}

#[test]
fn file_rules_inspect_the_root() {
    let fixture = Fixture::new();
    let root = fixture.layout.root();

    fs::set_permissions(
        root.join("usr/bin/dummy"),
        fs::Permissions::from_mode(0o750),
    )
    .expect("must chmod");
    symlink("dummy", root.join("usr/bin/alias")).expect("must link");
    fs::write(root.join("etc/dummy.conf.pacnew"), "new\n").expect("must write pacnew");

    assert_eq!(fixture.eval("FILE_EXIST=etc/dummy.conf"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_EXIST=etc"), Outcome::Fail);
    assert_eq!(fixture.eval("FILE_MODE=usr/bin/dummy|750"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_MODE=usr/bin/missing|750"), Outcome::Fail);
    assert_eq!(fixture.eval("FILE_TYPE=etc|dir"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_TYPE=usr/bin/alias|link"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_TYPE=usr/bin/alias|file"), Outcome::Fail);
    assert_eq!(fixture.eval("FILE_PACNEW=etc/dummy.conf"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_PACSAVE=etc/dummy.conf"), Outcome::Fail);
    assert_eq!(
        fixture.eval("FILE_CONTENTS=etc/dummy.conf|etc/dummy.conf\n"),
        Outcome::Pass
    );
    assert_eq!(fixture.eval("FILE_CONTENTS=etc/dummy.conf|other"), Outcome::Fail);
}

#[test]
fn file_modified_compares_against_the_snapshot() {
    let fixture = Fixture::new();
    let root = fixture.layout.root();

    assert_eq!(fixture.eval("FILE_MODIFIED=etc/dummy.conf"), Outcome::Fail);
    assert_eq!(fixture.eval("!FILE_MODIFIED=etc/dummy.conf"), Outcome::Pass);
    assert_eq!(fixture.eval("FILE_MODIFIED=never/captured"), Outcome::Pass);

    fs::write(root.join("etc/dummy.conf"), "edited\n").expect("must edit");
    assert_eq!(fixture.eval("FILE_MODIFIED=etc/dummy.conf"), Outcome::Pass);

    fs::remove_file(root.join("usr/bin/dummy")).expect("must remove");
    assert_eq!(fixture.eval("FILE_MODIFIED=usr/bin/dummy"), Outcome::Pass);
}

#[test]
fn cache_rules_look_in_the_package_cache() {
    let fixture = Fixture::new();
    assert_eq!(fixture.eval("CACHE_EXISTS=fresh"), Outcome::Pass);
    assert_eq!(fixture.eval("CACHE_EXISTS=standalone"), Outcome::Fail);
    assert_eq!(fixture.eval("CACHE_EXISTS=ghost"), Outcome::Fail);

    fs::write(fixture.layout.cache_dir().join("note.txt"), "cached").expect("must write");
    assert_eq!(fixture.eval("CACHE_FCONTENTS=note.txt|cached"), Outcome::Pass);
    assert_eq!(fixture.eval("CACHE_FCONTENTS=note.txt|other"), Outcome::Fail);
}

#[test]
fn cache_exists_matches_repository_version_and_skips_installed_packages() {
    let mut fixture = Fixture::new();
    let cache_dir = fixture.layout.cache_dir();

    let mut upgrade = Package::with_version("dummy", "2.0-1");
    build_package_archive(&mut upgrade, &cache_dir).expect("must build upgrade archive");
    fixture
        .databases
        .get_mut(&Tree::Sync("core".to_string()))
        .expect("core db must exist")
        .add(upgrade)
        .expect("must add upgrade");

    let mut installed = fixture
        .databases
        .get(&Tree::Local)
        .and_then(|db| db.get("dummy"))
        .cloned()
        .expect("installed dummy must exist");
    build_package_archive(&mut installed, &cache_dir).expect("must build installed archive");

    assert_eq!(fixture.eval("CACHE_EXISTS=dummy|2.0-1"), Outcome::Pass);
    assert_eq!(fixture.eval("CACHE_EXISTS=dummy"), Outcome::Pass);
    assert_eq!(fixture.eval("CACHE_EXISTS=dummy|1:1.0-2"), Outcome::Fail);
    assert_eq!(fixture.eval("CACHE_EXISTS=dummy|3.0-1"), Outcome::Fail);
    assert_eq!(fixture.eval("CACHE_EXISTS=fresh|1.0-1"), Outcome::Pass);
}

#[test]
fn inconsistent_database_is_an_evaluation_error() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.layout.local_db_dir().join("dummy-1:1.0-2").join("files"))
        .expect("must remove files");

    let err = Rule::parse("PKG_EXIST=dummy")
        .evaluate(&fixture.context(0))
        .expect_err("missing files must be an error");
    assert!(format!("{err:#}").contains("db-inconsistent:"), "{err:#}");
}

#[test]
fn settle_delay_is_requested_by_modified_rules() {
    assert!(Rule::parse("FILE_MODIFIED=etc/x").needs_settle_delay());
    assert!(Rule::parse("!PKG_MODIFIED=dummy").needs_settle_delay());
    assert!(!Rule::parse("PKG_EXIST=dummy").needs_settle_delay());
}
