use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::GzDecoder;

use super::*;

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_layout_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "pactest-core-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_layout() -> RootLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    RootLayout::new(build_test_layout_path(nanos))
}

fn archive_entry_names(path: &std::path::Path) -> Vec<String> {
    let file = File::open(path).expect("must open archive");
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .entries()
        .expect("must list entries")
        .map(|entry| {
            entry
                .expect("must read entry")
                .path()
                .expect("must decode entry path")
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[test]
fn build_test_layout_path_disambiguates_same_timestamp_calls() {
    let first = build_test_layout_path(42);
    let second = build_test_layout_path(42);
    assert_ne!(first, second);
}

#[test]
fn expand_file_list_adds_sorted_ancestor_directories() {
    let files = vec![FileEntry::parse("usr/local/bin/dummy").expect("must parse")];
    assert_eq!(
        expand_file_list(&files),
        vec![
            "usr/",
            "usr/local/",
            "usr/local/bin/",
            "usr/local/bin/dummy"
        ]
    );
}

#[test]
fn expand_file_list_deduplicates_shared_parents_and_strips_modifiers() {
    let files = vec![
        FileEntry::parse("etc/dummy.conf*").expect("must parse"),
        FileEntry::parse("etc/profile.d/").expect("must parse"),
        FileEntry::parse("bin/tool|0755").expect("must parse"),
        FileEntry::parse("lib/libfoo.so -> libfoo.so.1").expect("must parse"),
    ];
    assert_eq!(
        expand_file_list(&files),
        vec![
            "bin/",
            "bin/tool",
            "etc/",
            "etc/dummy.conf",
            "etc/profile.d/",
            "lib/",
            "lib/libfoo.so"
        ]
    );
}

#[test]
fn file_entry_parses_every_modifier() {
    let dir = FileEntry::parse("usr/share/").expect("must parse dir");
    assert_eq!(dir.kind(), &FileKind::Directory);
    assert_eq!(dir.path(), "usr/share/");

    let link = FileEntry::parse("usr/lib/libx.so -> libx.so.2").expect("must parse link");
    assert_eq!(
        link.kind(),
        &FileKind::Symlink {
            target: "libx.so.2".to_string()
        }
    );
    assert_eq!(link.path(), "usr/lib/libx.so");

    let exec = FileEntry::parse("bin/run|0755").expect("must parse mode");
    assert_eq!(exec.mode(), Some(0o755));
    assert_eq!(exec.path(), "bin/run");

    let altered = FileEntry::parse("etc/app.conf*").expect("must parse altered");
    assert!(altered.is_altered());
    assert_eq!(altered.path(), "etc/app.conf");
    assert_eq!(altered.content(), "etc/app.conf*\n");
}

#[test]
fn file_entry_rejects_empty_absolute_and_bad_mode() {
    assert!(FileEntry::parse("").is_err());
    assert!(FileEntry::parse("/etc/passwd").is_err());
    assert!(FileEntry::parse("bin/run|75x").is_err());
}

#[test]
fn dependency_parses_constraints_and_reasons() {
    let dep: Dependency = "glibc>=2.40".parse().expect("must parse");
    assert_eq!(dep.name, "glibc");
    assert_eq!(
        dep.constraint,
        Some(VersionConstraint {
            op: VersionOp::Ge,
            version: "2.40".to_string()
        })
    );

    let opt: Dependency = "bash-completion: shell completions"
        .parse()
        .expect("must parse optdepend");
    assert_eq!(opt.name, "bash-completion");
    assert_eq!(opt.reason.as_deref(), Some("shell completions"));

    for raw in ["foo", "foo<1.0", "foo<=1.0", "foo=1.0-2", "foo>1", "bar>=2: reason"] {
        let dep: Dependency = raw.parse().expect("must parse");
        assert_eq!(dep.to_string(), raw);
    }

    assert!("=1.0".parse::<Dependency>().is_err());
    assert!("foo>=".parse::<Dependency>().is_err());
}

#[test]
fn package_names_include_epoch() {
    let mut pkg = Package::with_version("dummy", "2.0-3");
    assert_eq!(pkg.fullname(), "dummy-2.0-3");
    pkg.epoch = 2;
    assert_eq!(pkg.full_version(), "2:2.0-3");
    assert_eq!(pkg.filename(), "dummy-2:2.0-3.pkg.tar.gz");
}

#[test]
fn package_validate_rejects_bad_identity() {
    assert!(Package::new("dummy").validate().is_ok());
    assert!(Package::new("").validate().is_err());
    assert!(Package::new("a/b").validate().is_err());
    assert!(Package::with_version("dummy", "1.0").validate().is_err());
    assert!(Package::with_version("dummy", "1-0-1").validate().is_err());
    assert!(Package::with_version("dummy", "1:1.0-1").validate().is_err());
}

#[test]
fn backup_lines_hash_the_raw_declaration() {
    let mut pkg = Package::new("dummy");
    pkg.add_backup("etc/dummy.conf*").expect("must add backup");
    assert_eq!(
        backup_lines(&pkg.backup),
        vec![format!(
            "etc/dummy.conf\t{}",
            md5_hex(b"etc/dummy.conf*\n")
        )]
    );
}

#[test]
fn install_script_renders_hook_functions() {
    let mut pkg = Package::new("dummy");
    pkg.set_scriptlet(ScriptletHook::PostInstall, "echo installed");
    pkg.set_scriptlet(ScriptletHook::PreInstall, "echo before");
    assert_eq!(
        pkg.install_script(),
        "pre_install() {\necho before\n}\npost_install() {\necho installed\n}\n"
    );
}

#[test]
fn local_database_round_trip_preserves_populated_fields() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut pkg = Package::with_version("dummy", "1.2-3");
    pkg.epoch = 1;
    pkg.desc = "dummy package".to_string();
    pkg.url = "https://example.test".to_string();
    pkg.license = vec!["GPL".to_string()];
    pkg.groups = vec!["base".to_string(), "devel".to_string()];
    pkg.reason = InstallReason::Dependency;
    pkg.size = 42;
    pkg.depends = vec!["libfoo>=1.0".parse().expect("must parse")];
    pkg.optdepends = vec!["extra: nicer output".parse().expect("must parse")];
    pkg.provides = vec!["dummy-bin".parse().expect("must parse")];
    pkg.add_file("usr/bin/dummy").expect("must add file");
    pkg.add_file("etc/dummy.conf").expect("must add file");
    pkg.add_backup("etc/dummy.conf").expect("must add backup");
    pkg.set_scriptlet(ScriptletHook::PostRemove, "echo removed");

    let mut db = Database::new(Tree::Local);
    db.add(pkg.clone()).expect("must add package");
    db.write_all(&layout).expect("must write database");

    let entry = layout.local_db_dir().join("dummy-1:1.2-3");
    assert!(entry.join("desc").is_file());
    assert!(entry.join("files").is_file());
    assert!(entry.join("install").is_file());

    let read = db
        .read(&layout, "dummy")
        .expect("must read database")
        .expect("package must exist");
    assert_eq!(read.name, "dummy");
    assert_eq!(read.version, "1.2-3");
    assert_eq!(read.epoch, 1);
    assert_eq!(read.desc, pkg.desc);
    assert_eq!(read.url, pkg.url);
    assert_eq!(read.license, pkg.license);
    assert_eq!(read.groups, pkg.groups);
    assert_eq!(read.reason, InstallReason::Dependency);
    assert_eq!(read.size, 42);
    assert_eq!(read.depends, pkg.depends);
    assert_eq!(read.optdepends, pkg.optdepends);
    assert_eq!(read.provides, pkg.provides);
    assert!(read.conflicts.is_empty());
    assert!(read.arch.is_empty());
    assert_eq!(
        read.files
            .iter()
            .map(|entry| entry.path().to_string())
            .collect::<Vec<_>>(),
        vec!["etc/dummy.conf", "usr/bin/dummy"]
    );
    assert_eq!(read.backup, pkg.backup);
    assert_eq!(
        read.scriptlets.get(&ScriptletHook::PostRemove).map(String::as_str),
        Some("echo removed")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn desc_sections_are_blank_line_separated_and_omit_empty_fields() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut db = Database::new(Tree::Local);
    let pkg = Package::new("dummy");
    db.write(&layout, &pkg).expect("must write entry");

    let desc = fs::read_to_string(layout.local_db_dir().join("dummy-1.0-1").join("desc"))
        .expect("must read desc");
    assert_eq!(desc, "%NAME%\ndummy\n\n%VERSION%\n1.0-1\n\n");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn read_matches_exact_package_name_only() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut db = Database::new(Tree::Local);
    db.add(Package::new("foo-bar")).expect("must add package");
    db.write_all(&layout).expect("must write database");

    assert!(db.read(&layout, "foo").expect("must read").is_none());
    let found = db
        .read(&layout, "foo-bar")
        .expect("must read")
        .expect("foo-bar must exist");
    assert_eq!(found.version, DEFAULT_VERSION);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn read_missing_tree_is_absent_but_missing_files_is_inconsistent() {
    let layout = test_layout();
    let db = Database::new(Tree::Local);
    assert!(db.read(&layout, "dummy").expect("must read").is_none());

    layout.ensure_base_dirs().expect("must create dirs");
    let entry = layout.local_db_dir().join("dummy-1.0-1");
    fs::create_dir_all(&entry).expect("must create entry dir");
    fs::write(entry.join("desc"), "%NAME%\ndummy\n").expect("must write desc");

    let err = db
        .read(&layout, "dummy")
        .expect_err("local entry without files must be rejected");
    assert!(err.to_string().starts_with("db-inconsistent:"), "{err}");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn add_replaces_packages_with_the_same_name() {
    let mut db = Database::new(Tree::Sync("core".to_string()));
    db.add(Package::with_version("dummy", "1.0-1"))
        .expect("must add first");
    db.add(Package::with_version("dummy", "2.0-1"))
        .expect("must add second");
    assert_eq!(db.packages().len(), 1);
    assert_eq!(db.get("dummy").map(|pkg| pkg.version.as_str()), Some("2.0-1"));
}

#[test]
fn sync_entries_carry_archive_fields_and_no_files() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut pkg = Package::new("dummy");
    pkg.force = true;
    pkg.csize = 100;
    pkg.md5sum = "abc".to_string();
    pkg.replaces = vec!["oldummy".parse().expect("must parse")];
    pkg.add_file("bin/dummy").expect("must add file");

    let mut db = Database::new(Tree::Sync("core".to_string()));
    db.add(pkg).expect("must add");
    db.write_all(&layout).expect("must write");

    let entry = layout.sync_db_dir().join("core").join("dummy-1.0-1");
    let desc = fs::read_to_string(entry.join("desc")).expect("must read desc");
    assert!(desc.contains("%FILENAME%\ndummy-1.0-1.pkg.tar.gz\n"));
    assert!(desc.contains("%FORCE%\n\n"));
    assert!(desc.contains("%CSIZE%\n100\n"));
    assert!(desc.contains("%REPLACES%\noldummy\n"));
    assert!(!entry.join("files").exists());

    let read = db
        .read(&layout, "dummy")
        .expect("must read")
        .expect("must exist");
    assert!(read.force);
    assert_eq!(read.csize, 100);
    assert_eq!(read.md5sum, "abc");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn gensync_packs_tree_entries_relative_to_tree_dir() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut db = Database::new(Tree::Sync("extra".to_string()));
    db.add(Package::new("alpha")).expect("must add");
    db.add(Package::new("beta")).expect("must add");
    db.write_all(&layout).expect("must write");

    let archive = db.gensync(&layout).expect("must pack sync db");
    assert_eq!(archive, layout.sync_archive_path("extra"));

    let names = archive_entry_names(&archive);
    assert!(names.iter().any(|name| name == "alpha-1.0-1/desc"), "{names:?}");
    assert!(names.iter().any(|name| name == "beta-1.0-1/desc"), "{names:?}");
    assert!(names.iter().all(|name| !name.starts_with("extra")));

    assert!(Database::new(Tree::Local).gensync(&layout).is_err());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn is_modified_tracks_rewritten_entries() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut db = Database::new(Tree::Local);
    db.add(Package::new("dummy")).expect("must add");
    db.write_all(&layout).expect("must write");
    assert!(!db.is_modified(&layout, "dummy").expect("must check"));
    assert!(!db.is_modified(&layout, "missing").expect("must check"));

    let desc = layout.local_db_dir().join("dummy-1.0-1").join("desc");
    fs::write(&desc, "%NAME%\ndummy\n\n%VERSION%\n1.0-1\n\n%DESC%\nchanged\n")
        .expect("must rewrite desc");
    assert!(db.is_modified(&layout, "dummy").expect("must check"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn build_package_archive_fills_sizes_and_checksums() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut pkg = Package::new("dummy");
    pkg.add_file("usr/bin/dummy|0755").expect("must add");
    pkg.add_file("usr/lib/libdummy.so -> libdummy.so.1")
        .expect("must add");
    pkg.set_scriptlet(ScriptletHook::PostInstall, "true");

    let archive = build_package_archive(&mut pkg, &layout.cache_dir()).expect("must build");
    assert_eq!(archive, layout.cache_dir().join("dummy-1.0-1.pkg.tar.gz"));
    assert_eq!(pkg.size, "usr/bin/dummy|0755\n".len() as u64);
    assert_eq!(
        pkg.csize,
        fs::metadata(&archive).expect("must stat").len()
    );
    assert_eq!(pkg.md5sum, file_md5(&archive).expect("must hash"));
    assert_eq!(pkg.sha256sum.len(), 64);

    let names = archive_entry_names(&archive);
    assert_eq!(names[0], ".PKGINFO");
    assert_eq!(names[1], ".INSTALL");
    assert!(names.iter().any(|name| name == "usr/bin/dummy"));
    assert!(names.iter().any(|name| name == "usr/lib/libdummy.so"));

    let file = File::open(&archive).expect("must open");
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    let mut pkginfo = String::new();
    tarball
        .entries()
        .expect("must list")
        .next()
        .expect("must have entry")
        .expect("must read entry")
        .read_to_string(&mut pkginfo)
        .expect("must read pkginfo");
    assert!(pkginfo.contains("pkgname = dummy\n"));
    assert!(pkginfo.contains("pkgver = 1.0-1\n"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn materialize_writes_declaration_content_and_mode() {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("must create root");

    let entry = FileEntry::parse("opt/tool|0700").expect("must parse");
    let path = entry.materialize(layout.root()).expect("must materialize");
    set_fixed_times(&path, FIXTURE_MTIME).expect("must stamp");

    assert_eq!(
        fs::read_to_string(&path).expect("must read"),
        "opt/tool|0700\n"
    );
    let metadata = fs::metadata(&path).expect("must stat");
    assert_eq!(metadata.permissions().mode() & 0o7777, 0o700);
    assert_eq!(
        metadata
            .modified()
            .expect("must read mtime")
            .duration_since(std::time::UNIX_EPOCH)
            .expect("after epoch")
            .as_secs(),
        FIXTURE_MTIME
    );

    let link = FileEntry::parse("opt/alias -> tool").expect("must parse");
    let link_path = link.materialize(layout.root()).expect("must materialize link");
    assert!(fs::symlink_metadata(&link_path)
        .expect("must lstat")
        .file_type()
        .is_symlink());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn file_stamp_ignores_access_time_only_changes() {
    let base = FileStamp {
        checksum: Some("abc".to_string()),
        accessed: Timespec { secs: 1, nanos: 0 },
        modified: Timespec { secs: 2, nanos: 0 },
        changed: Timespec { secs: 3, nanos: 0 },
    };
    let mut touched = base.clone();
    touched.accessed = Timespec { secs: 99, nanos: 5 };
    assert!(!base.differs_from(&touched));

    let mut rewritten = base.clone();
    rewritten.modified = Timespec { secs: 4, nanos: 0 };
    assert!(base.differs_from(&rewritten));

    let mut edited = base.clone();
    edited.checksum = Some("def".to_string());
    assert!(base.differs_from(&edited));
}

#[test]
fn snapshot_detects_content_changes_and_removals() {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("must create root");
    for decl in ["etc/a.conf", "etc/b.conf", "usr/bin/c"] {
        let path = FileEntry::parse(decl)
            .expect("must parse")
            .materialize(layout.root())
            .expect("must materialize");
        set_fixed_times(&path, FIXTURE_MTIME).expect("must stamp");
    }

    let snapshot = FilesystemSnapshot::capture(layout.root()).expect("must snapshot");
    assert_eq!(
        snapshot
            .entries()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>(),
        vec!["etc/a.conf", "etc/b.conf", "usr/bin/c"]
    );

    let _ = fs::read_to_string(layout.path("etc/a.conf")).expect("must read");
    fs::write(layout.path("etc/b.conf"), "changed\n").expect("must rewrite");
    fs::remove_file(layout.path("usr/bin/c")).expect("must remove");

    let check = |name: &str| {
        snapshot
            .entries_named(name)
            .next()
            .expect("entry must exist")
            .is_modified(layout.root())
            .expect("must check")
    };
    assert!(!check("etc/a.conf"));
    assert!(check("etc/b.conf"));
    assert!(check("usr/bin/c"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn write_only_fixture_files_are_stamped_and_snapshotted() {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("must create root");

    let path = FileEntry::parse("etc/secret|0200")
        .expect("must parse")
        .materialize(layout.root())
        .expect("must materialize");
    set_fixed_times(&path, FIXTURE_MTIME).expect("must stamp write-only file");

    let metadata = fs::metadata(&path).expect("must stat");
    assert_eq!(metadata.permissions().mode() & 0o7777, 0o200);
    assert_eq!(
        metadata
            .modified()
            .expect("must read mtime")
            .duration_since(std::time::UNIX_EPOCH)
            .expect("after epoch")
            .as_secs(),
        FIXTURE_MTIME
    );

    let snapshot = FilesystemSnapshot::capture(layout.root()).expect("must snapshot");
    let entry = snapshot
        .entries_named("etc/secret")
        .next()
        .expect("write-only file must be listed");
    assert!(!entry.is_modified(layout.root()).expect("must compare"));

    let _ = fs::remove_dir_all(layout.root());
}
