/// Streaming session tests
///
/// End-to-end coverage of the scoped streaming path against the emulated
/// server: round trips, session reuse, reentrancy and open preconditions.
/// Run with: cargo test --test streaming_session_tests
use std::sync::{Arc, Mutex, MutexGuard};

use filestream::emulation::{EmulatedConnection, EmulatedServer};
use filestream::native::binding;
use filestream::{BlobLocator, FileStreamSession, OpenMode, RecordId, StreamError};

const TABLE: &str = "documents";

// The native binding is process-wide; run one test environment at a time.
static ENV_LOCK: Mutex<()> = Mutex::new(());

struct TestEnv {
    server: EmulatedServer,
    _guard: MutexGuard<'static, ()>,
}

fn setup() -> TestEnv {
    let guard = ENV_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
    let server = EmulatedServer::new().unwrap();
    binding::install(server.streaming_api()).unwrap();
    TestEnv {
        server,
        _guard: guard,
    }
}

fn new_session(env: &TestEnv) -> (RecordId, FileStreamSession<EmulatedConnection>) {
    let id = RecordId::new();
    env.server.create_record(TABLE, id).unwrap();
    let backend = Arc::new(Mutex::new(env.server.connect()));
    let session = FileStreamSession::for_record(backend, BlobLocator::new(TABLE), id);
    (id, session)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn round_trip_is_byte_exact() {
    let env = setup();

    for len in [0usize, 1, 1_048_576] {
        let (_, session) = new_session(&env);
        let data = pattern(len);

        let written = session.store_from(&mut data.as_slice()).unwrap();
        assert_eq!(written, len as u64);
        assert_eq!(session.read_to_vec().unwrap(), data, "length {len}");
    }
}

#[test]
fn store_replaces_previous_content() {
    let env = setup();
    let (_, session) = new_session(&env);

    session.store_from(&mut &b"a much longer payload"[..]).unwrap();
    session.store_from(&mut &b"short"[..]).unwrap();

    assert_eq!(session.read_to_vec().unwrap(), b"short");
}

#[test]
fn manual_stream_reads_in_chunks() {
    let env = setup();
    let (_, session) = new_session(&env);
    session.store_from(&mut &b"0123456789"[..]).unwrap();

    let collected = session
        .with_stream(OpenMode::parse("rb").unwrap(), |stream| {
            let mut out = Vec::new();
            let mut buf = [0u8; 3];
            loop {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Ok(out)
        })
        .unwrap();

    assert_eq!(collected, b"0123456789");
}

#[test]
fn closing_inside_the_body_is_harmless() {
    let env = setup();
    let (_, session) = new_session(&env);

    session
        .with_stream(OpenMode::write().binary(), |stream| {
            stream.write(b"data")?;
            stream.close()?;
            stream.close()?; // second close is a no-op
            Ok(())
        })
        .unwrap();

    assert_eq!(session.read_to_vec().unwrap(), b"data");
    assert_eq!(env.server.open_handle_count(), 0);
}

#[test]
fn second_open_while_streaming_fails() {
    let env = setup();
    let (_, session) = new_session(&env);
    session.store_from(&mut &b"content"[..]).unwrap();

    let sibling = session.clone();
    let result = session.with_stream(OpenMode::read().binary(), |_| {
        let nested = sibling.with_stream(OpenMode::read().binary(), |_| Ok(()));
        assert!(matches!(nested, Err(StreamError::AlreadyOpen)));
        Ok(())
    });
    assert!(result.is_ok());

    // After the first stream closed, the descriptor opens again.
    assert_eq!(sibling.read_to_vec().unwrap(), b"content");
}

#[test]
fn unsaved_record_is_rejected_without_native_calls() {
    let env = setup();
    let backend = Arc::new(Mutex::new(env.server.connect()));
    let session: FileStreamSession<EmulatedConnection> =
        FileStreamSession::for_unsaved_record(backend, BlobLocator::new(TABLE));

    let err = session.store_from(&mut &b"data"[..]).unwrap_err();
    assert!(matches!(err, StreamError::NotPersisted));
    assert_eq!(env.server.open_calls(), 0);
}

#[test]
fn unknown_record_is_not_found() {
    let env = setup();
    let backend = Arc::new(Mutex::new(env.server.connect()));
    let session =
        FileStreamSession::for_record(backend, BlobLocator::new(TABLE), RecordId::new());

    let err = session.read_to_vec().unwrap_err();
    assert!(matches!(err, StreamError::NotFound(_)));
    assert_eq!(env.server.open_calls(), 0);
}

#[test]
fn session_survives_many_open_close_cycles() {
    let env = setup();
    let (_, session) = new_session(&env);

    for round in 0u8..5 {
        let data = vec![round; 128];
        session.store_from(&mut data.as_slice()).unwrap();
        assert_eq!(session.read_to_vec().unwrap(), data);
    }
    assert_eq!(env.server.open_handle_count(), 0);
}

#[test]
fn text_mode_round_trips_line_endings() {
    let env = setup();
    let (_, session) = new_session(&env);
    let text = b"line one\nline two\nline three";

    session
        .with_stream(OpenMode::write(), |stream| {
            stream.write(text)?;
            Ok(())
        })
        .unwrap();

    let read_back = session
        .with_stream(OpenMode::read(), |stream| {
            let mut out = Vec::new();
            let mut buf = [0u8; 7];
            loop {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Ok(out)
        })
        .unwrap();

    assert_eq!(read_back, text);
}
