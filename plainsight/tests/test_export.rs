use crossbeam_channel::bounded;
use plainsight::decode::{CapturedEvent, LifecycleKind, ProcessRecord, TlsDirection, TlsRecord};
use plainsight::sensor::{spawn_output_worker, OutputSink};
use std::io::{BufRead, BufReader};

fn exec_event(pid: u32) -> CapturedEvent {
    CapturedEvent::Process(ProcessRecord {
        timestamp_ns: 10,
        kind: LifecycleKind::Exec,
        pid,
        ppid: 1,
        uid: 0,
        gid: 0,
        comm: "ls".to_string(),
        exe: Some("/usr/bin/ls".to_string()),
        code: 0,
    })
}

fn read_event(data: &[u8]) -> CapturedEvent {
    CapturedEvent::Tls(TlsRecord {
        timestamp_ns: 20,
        direction: TlsDirection::Read,
        pid: 7,
        tid: 8,
        uid: 1000,
        comm: "wget".to_string(),
        data: data.to_vec(),
    })
}

fn export_lines(events: Vec<CapturedEvent>) -> Vec<serde_json::Value> {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("events.jsonl");

    let sink = OutputSink::create(false, Some(&path)).expect("Failed to create sink");
    let (tx, rx) = bounded(16);
    let worker = spawn_output_worker(rx, sink);
    for event in events {
        tx.send(event).unwrap();
    }
    drop(tx);
    let stats = worker.join().unwrap().expect("Output worker failed");
    assert_eq!(stats.printed, 0);

    let file = std::fs::File::open(&path).unwrap();
    let lines: Vec<serde_json::Value> = BufReader::new(file)
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).expect("Invalid JSON line"))
        .collect();
    assert_eq!(lines.len() as u64, stats.exported);
    lines
}

#[test]
fn test_export_writes_one_object_per_event() {
    let lines = export_lines(vec![exec_event(100), read_event(b"HTTP/1.1 200 OK"), exec_event(101)]);

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["type"], "process");
    assert_eq!(lines[0]["kind"], "exec");
    assert_eq!(lines[0]["pid"], 100);
    assert_eq!(lines[0]["exe"], "/usr/bin/ls");
    assert_eq!(lines[2]["pid"], 101);
}

#[test]
fn test_export_tls_text_and_binary() {
    let lines = export_lines(vec![read_event(b"HTTP/1.1 200 OK"), read_event(&[0x16, 0x03, 0xff])]);

    assert_eq!(lines[0]["type"], "tls");
    assert_eq!(lines[0]["direction"], "read");
    assert_eq!(lines[0]["encoding"], "utf8");
    assert_eq!(lines[0]["data"], "HTTP/1.1 200 OK");
    assert_eq!(lines[0]["data_len"], 15);

    assert_eq!(lines[1]["encoding"], "hex");
    assert_eq!(lines[1]["data"], "1603ff");
    assert_eq!(lines[1]["data_len"], 3);
}

#[test]
fn test_exit_records_omit_exe() {
    let mut event = exec_event(5);
    if let CapturedEvent::Process(p) = &mut event {
        p.kind = LifecycleKind::Exit;
        p.exe = None;
        p.code = 1 << 8;
    }
    let lines = export_lines(vec![event]);

    assert_eq!(lines[0]["kind"], "exit");
    assert!(lines[0].get("exe").is_none());
    assert_eq!(lines[0]["code"], 256);
}

#[test]
fn test_export_to_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("events.jsonl");
    assert!(OutputSink::create(false, Some(&path)).is_err());
}
