//! Log watcher behaviour against a real, concurrently written file

use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use cts_core::LogWatcher;
use tempfile::TempDir;

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn truncate(path: &Path) {
    OpenOptions::new().write(true).open(path).unwrap().set_len(0).unwrap();
}

fn log_file() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ha-log");
    std::fs::File::create(&path).unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_sees_line_written_while_waiting() {
    let (_dir, path) = log_file();
    let mut watcher = LogWatcher::new(&path, ["node beta: is dead"])
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5));
    watcher.arm(false).await.unwrap();

    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&writer_path, "heartbeat: node alpha: status active\n");
        append(&writer_path, "heartbeat: node beta: is dead\n");
    });

    let line = watcher.poll(None).await.unwrap();
    writer.await.unwrap();
    assert_eq!(line.as_deref(), Some("heartbeat: node beta: is dead"));
}

#[tokio::test]
async fn test_truncation_mid_watch_rearms_from_start() {
    let (_dir, path) = log_file();
    append(&path, "a long line of history that makes the file big\n".repeat(20).as_str());

    let mut watcher = LogWatcher::new(&path, ["Shutting down\\."])
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    watcher.arm(false).await.unwrap();

    truncate(&path);
    append(&path, "heartbeat: Shutting down.\n");

    let line = watcher.poll(Some(Duration::from_millis(200))).await.unwrap();
    assert_eq!(line.as_deref(), Some("heartbeat: Shutting down."));
    assert_eq!(watcher.poll(Some(Duration::ZERO)).await.unwrap(), None);
}

#[tokio::test]
async fn test_timeout_with_nothing_new() {
    let (_dir, path) = log_file();
    append(&path, "Shutting down. (old news)\n");

    let mut watcher = LogWatcher::new(&path, ["Shutting down"])
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
    watcher.arm(false).await.unwrap();

    let started = std::time::Instant::now();
    assert_eq!(watcher.poll(Some(Duration::from_millis(60))).await.unwrap(), None);
    assert!(started.elapsed() >= Duration::from_millis(60));
}

/// Lines in the generated log; matching lines carry `MATCH`
fn render(lines: &[bool]) -> (String, Vec<String>) {
    let mut text = String::new();
    let mut expected = Vec::new();
    for (i, matching) in lines.iter().enumerate() {
        let line = if *matching {
            format!("event MATCH {}", i)
        } else {
            format!("noise {}", i)
        };
        if *matching {
            expected.push(line.clone());
        }
        text.push_str(&line);
        text.push('\n');
    }
    (text, expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// However the file is written in pieces, every matching line is
    /// reported exactly once and in order
    #[test]
    fn prop_each_line_reported_at_most_once(
        lines in prop::collection::vec(prop::bool::ANY, 1..40),
        cuts in prop::collection::vec(0usize..2000, 0..12),
    ) {
        let (text, expected) = render(&lines);
        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (text.len() + 1)).collect();
        cuts.push(text.len());
        cuts.sort_unstable();
        cuts.dedup();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let seen = runtime.block_on(async {
            let (_dir, path) = log_file();
            let mut watcher = LogWatcher::new(&path, ["MATCH"]).unwrap();
            watcher.arm(false).await.unwrap();

            let mut seen = Vec::new();
            let mut written = 0;
            for cut in cuts {
                append(&path, &text[written..cut]);
                written = cut;
                while let Some(line) = watcher.poll(Some(Duration::ZERO)).await.unwrap() {
                    seen.push(line);
                }
            }
            seen
        });

        prop_assert_eq!(seen, expected);
    }
}
