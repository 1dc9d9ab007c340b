//! Coverage for the batch façade: grouping by cabinet, events, and error
//! wrapping.

use std::fs;
use std::io::Write;

use cabstore::manager::{run_batch, Event, ManagerError, Request};
use cabstore::progress::CancelToken;
use cabstore::CompressionType;

fn write_host_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::File::create(&path).unwrap().write_all(contents).unwrap();
    path
}

#[test]
fn batch_creates_two_cabinets_from_one_request_list() {
    let dir = tempfile::tempdir().unwrap();
    let source_a = write_host_file(&dir, "a.txt", b"alpha");
    let source_b = write_host_file(&dir, "b.txt", b"beta");
    let cab_one = dir.path().join("one.cab");
    let cab_two = dir.path().join("two.cab");

    let requests = vec![
        Request::AddFile { cab_path: cab_one.clone(), source_path: source_a, rel_path: "a.txt".to_string() },
        Request::AddFile { cab_path: cab_two.clone(), source_path: source_b, rel_path: "b.txt".to_string() },
    ];

    let mut completed = Vec::new();
    run_batch(requests, CompressionType::None, &CancelToken::new(), |event| {
        if let Event::CabinetCompleted { cab_path } = event {
            completed.push(cab_path);
        }
    })
    .unwrap();

    assert_eq!(completed, vec![cab_one.clone(), cab_two.clone()]);
    assert!(cab_one.exists());
    assert!(cab_two.exists());
}

#[test]
fn batch_extracts_then_deletes_in_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_host_file(&dir, "a.txt", b"alpha");
    let cab_path = dir.path().join("one.cab");
    let dest = dir.path().join("out.txt");

    run_batch(
        vec![Request::AddFile { cab_path: cab_path.clone(), source_path: source, rel_path: "a.txt".to_string() }],
        CompressionType::None,
        &CancelToken::new(),
        |_| {},
    )
    .unwrap();

    let requests = vec![
        Request::Extract { cab_path: cab_path.clone(), rel_path: "a.txt".to_string(), dest_path: dest.clone() },
        Request::Delete { cab_path: cab_path.clone(), rel_path: "a.txt".to_string() },
    ];
    let mut processed = Vec::new();
    run_batch(requests, CompressionType::None, &CancelToken::new(), |event| {
        if let Event::FileProcessed { rel_path, processed: ok, .. } = event {
            processed.push((rel_path, ok));
        }
    })
    .unwrap();

    assert_eq!(processed, vec![("a.txt".to_string(), true), ("a.txt".to_string(), true)]);
    assert_eq!(fs::read(&dest).unwrap(), b"alpha");

    let cab = cabstore::Cabinet::open(&cab_path).unwrap();
    assert_eq!(cab.files().count(), 0);
}

#[test]
fn delete_of_missing_file_is_reported_but_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_host_file(&dir, "a.txt", b"alpha");
    let cab_path = dir.path().join("one.cab");

    run_batch(
        vec![Request::AddFile { cab_path: cab_path.clone(), source_path: source, rel_path: "a.txt".to_string() }],
        CompressionType::None,
        &CancelToken::new(),
        |_| {},
    )
    .unwrap();

    let mut processed = None;
    run_batch(
        vec![Request::Delete { cab_path: cab_path.clone(), rel_path: "nope.txt".to_string() }],
        CompressionType::None,
        &CancelToken::new(),
        |event| {
            if let Event::FileProcessed { processed: ok, .. } = event {
                processed = Some(ok);
            }
        },
    )
    .unwrap();
    assert_eq!(processed, Some(false));
}

#[test]
fn a_codec_failure_is_wrapped_with_its_cabinet_path() {
    let dir = tempfile::tempdir().unwrap();
    let cab_path = dir.path().join("bad.cab");
    fs::write(&cab_path, b"ABCD\0\0\0\0\0\0\0\0").unwrap();

    let err = run_batch(
        vec![Request::Delete { cab_path: cab_path.clone(), rel_path: "x.txt".to_string() }],
        CompressionType::None,
        &CancelToken::new(),
        |_| {},
    )
    .unwrap_err();
    match err {
        ManagerError::Failure(failure) => assert_eq!(failure.cab_path, cab_path),
        ManagerError::Cancelled => panic!("expected a codec failure, not a cancellation"),
    }
}
