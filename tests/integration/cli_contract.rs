use tempfile::TempDir;
use treeindex::tooling::cli::{CliContext, Commands};
use treeindex::ApiError;

fn context(dir: &TempDir) -> CliContext {
    CliContext::new(None, Some(dir.path().join("index.sqlite"))).unwrap()
}

#[test]
fn put_ls_stat_log_json_contracts() {
    let dir = TempDir::new().unwrap();
    let cli = context(&dir);

    cli.execute(&Commands::Mkdir {
        path: "/docs".to_string(),
    })
    .unwrap();
    cli.execute(&Commands::Put {
        path: "/docs/a.txt".to_string(),
        etag: "e1".to_string(),
        size: 3,
        update: false,
    })
    .unwrap();

    let output = cli
        .execute(&Commands::Ls {
            path: "/docs".to_string(),
            recursive: false,
            etags: false,
            limit: None,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    let items = parsed.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["path"], "/docs/a.txt");
    assert_eq!(items[0]["node"]["name"], "a.txt");
    assert_eq!(items[0]["node"]["size"], 3);

    let output = cli
        .execute(&Commands::Stat {
            path: "/docs".to_string(),
            etags: true,
            commits: false,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["path"], "/docs");
    assert_eq!(parsed["children"]["leaves"], 1);
    assert_eq!(parsed["node"]["size"], 3);
    assert_ne!(parsed["node"]["etag"], "-1");

    let output = cli
        .execute(&Commands::Log {
            path: "/docs/a.txt".to_string(),
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["etag"], "e1");
}

#[test]
fn duplicate_put_is_conflict_and_state_persists() {
    let dir = TempDir::new().unwrap();
    {
        let cli = context(&dir);
        let put = Commands::Put {
            path: "/f".to_string(),
            etag: "e".to_string(),
            size: 1,
            update: false,
        };
        cli.execute(&put).unwrap();
        let err = cli.execute(&put).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(err.status_code(), 409);
    }

    let reopened = context(&dir);
    let output = reopened
        .execute(&Commands::Check {
            fix: false,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["clean"], true);
    assert_eq!(parsed["scanned"], 2);
}

#[test]
fn clean_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    let cli = context(&dir);
    let err = cli.execute(&Commands::Clean { yes: false }).unwrap_err();
    assert_eq!(err.status_code(), 400);
    let output = cli.execute(&Commands::Clean { yes: true }).unwrap();
    assert!(output.starts_with("Removed tables"));
}

#[test]
fn index_command_mirrors_directory() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(source.join("sub")).unwrap();
    std::fs::write(source.join("sub/file.txt"), b"abcd").unwrap();

    let cli = context(&dir);
    let output = cli
        .execute(&Commands::Index {
            dir: source,
            prefix: "/backup".to_string(),
            flush_every: 0,
        })
        .unwrap();
    assert!(output.contains("1 collection(s), 1 leaf(s), 4 bytes"));

    let output = cli
        .execute(&Commands::Stat {
            path: "/backup/sub/file.txt".to_string(),
            etags: false,
            commits: true,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["node"]["size"], 4);
    assert_eq!(parsed["commits"].as_array().unwrap().len(), 1);
}
