//! `hookcord status`: show where state lives and which sessions have threads.

use std::fmt::Write as _;

use crate::paths::DataDir;
use crate::thread_store::{ThreadBinding, ThreadStore};
use crate::VERSION;

pub async fn run(data_dir: &DataDir, limit: usize) -> anyhow::Result<()> {
    println!();
    println!("  hookcord v{}", VERSION);
    println!("  Data dir: {}", data_dir.root().display());
    println!("  Logs: {}", data_dir.log_dir().display());

    let db_path = data_dir.db_path();
    if !db_path.exists() {
        println!("  Database: not found (created on first dispatch)");
        println!();
        return Ok(());
    }

    let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    println!("  Database: {} ({} KB)", db_path.display(), size / 1024);

    let store = ThreadStore::open(&db_path).await?;
    let bindings = store.list(limit).await?;
    println!();
    print!("{}", render_bindings(&bindings));
    println!();
    Ok(())
}

fn render_bindings(bindings: &[ThreadBinding]) -> String {
    let mut out = String::new();
    if bindings.is_empty() {
        out.push_str("  No session threads yet.\n");
        return out;
    }

    let _ = writeln!(out, "  Session threads (most recent first):");
    for b in bindings {
        let _ = writeln!(
            out,
            "    {}  channel {}  thread {}  {} msgs  last {}",
            b.session_id, b.channel_id, b.thread_id, b.message_count, b.last_used_at
        );
    }
    out
}
