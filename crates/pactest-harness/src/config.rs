use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use pactest_core::{Database, RootLayout, Tree};

const DEFAULT_SIG_LEVEL: &str = "Never";

/// Renders `etc/pacman.conf` for a test root: the `[options]` section,
/// then one section per sync tree pointing at its `file://` repository.
pub fn render_config(
    layout: &RootLayout,
    options: &BTreeMap<String, Vec<String>>,
    databases: &BTreeMap<Tree, Database>,
) -> String {
    let mut lines = vec!["[options]".to_string()];
    for (key, values) in options {
        push_option(&mut lines, key, values);
    }

    for db in databases.values() {
        let Tree::Sync(name) = db.tree() else {
            continue;
        };
        let db_options = db.options();
        lines.push(String::new());
        lines.push(format!("[{name}]"));

        let sig_level = db_options
            .get("SigLevel")
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or(DEFAULT_SIG_LEVEL);
        lines.push(format!("SigLevel = {sig_level}"));

        if !db_options.contains_key("Server") {
            lines.push(format!(
                "Server = file://{}",
                layout.repo_tree_dir(name).display()
            ));
        }
        for (key, values) in db_options {
            if key != "SigLevel" {
                push_option(&mut lines, key, values);
            }
        }
    }

    format!("{}\n", lines.join("\n"))
}

pub fn write_config(
    layout: &RootLayout,
    options: &BTreeMap<String, Vec<String>>,
    databases: &BTreeMap<Tree, Database>,
) -> Result<()> {
    let path = layout.config_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, render_config(layout, options, databases))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn push_option(lines: &mut Vec<String>, key: &str, values: &[String]) {
    if values.is_empty() {
        lines.push(key.to_string());
    }
    for value in values {
        if value.is_empty() {
            lines.push(key.to_string());
        } else {
            lines.push(format!("{key} = {value}"));
        }
    }
}
