//! # Atomic Writer Race Tests
//!
//! A reader polling the destination while a writer keeps replacing it must
//! only ever observe complete contents.

use secrets_provider::controller::atomic_writer::open_atomic_writer;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const SHORT: &str = "password: short";

fn long_content() -> String {
    format!("password: {}", "x".repeat(64 * 1024))
}

fn write(path: &std::path::Path, content: &str) {
    let mut writer = open_atomic_writer(path, 0o600).unwrap();
    writer.write_all(content.as_bytes()).unwrap();
    writer.close().unwrap();
}

#[test]
fn test_reader_never_sees_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.yaml");
    let long = long_content();
    write(&path, SHORT);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let path = path.clone();
        let long = long.clone();
        thread::spawn(move || {
            let mut reads = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let content = std::fs::read_to_string(&path).unwrap();
                assert!(
                    content == SHORT || content == long,
                    "observed partial content of {} bytes",
                    content.len()
                );
                reads += 1;
                if finished {
                    return reads;
                }
            }
        })
    };

    for i in 0..200 {
        write(&path, if i % 2 == 0 { long.as_str() } else { SHORT });
    }
    done.store(true, Ordering::SeqCst);

    let reads = reader.join().unwrap();
    assert!(reads > 0);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "secrets.yaml")
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
}
