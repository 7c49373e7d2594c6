//! End-to-end integration tests for editd.
//!
//! These tests run the daemon against a real temporary workspace and real
//! TCP sockets, verifying complete flows:
//! - File open/read/write/create round trips
//! - Write-capability arbitration between competing editors
//! - Grant cleanup when clients close files or disconnect

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use daemon::config::Config;
use daemon::files::LocalFiles;
use daemon::session::SessionCore;
use daemon::transport;
use protocol::messages::{
    AcquireCapability, CloseFile, CreateFile, CreateFileDescriptor, CreateKind, Envelope, Message,
    OpenFile, OpenFileResponse, OpenedFile, Ping, Pong, ReadFile, ReadFileResult, WriteFile,
    WriteFileResult,
};
use protocol::{Capability, CapabilityIdGen, RootId, WorkspacePath};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A workspace on disk plus a running daemon serving it.
struct TestDaemon {
    addr: SocketAddr,
    workspace: TempDir,
    _shutdown: CancellationToken,
}

impl TestDaemon {
    async fn start() -> Self {
        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join("a.txt"), b"hello").unwrap();

        let mut config = Config::default();
        config
            .roots
            .insert("project".to_string(), workspace.path().to_path_buf());
        config.validate().unwrap();

        let files = LocalFiles::new(config.root_paths());
        let session = SessionCore::spawn(files, Arc::new(CapabilityIdGen::new()));
        session.initialize(config.session_config());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(transport::serve(listener, session, shutdown.clone()));

        Self {
            addr,
            workspace,
            _shutdown: shutdown,
        }
    }
}

/// One editor connection speaking the line protocol.
struct Editor {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write_half: OwnedWriteHalf,
    next_sequence: u64,
}

impl Editor {
    async fn connect(daemon: &TestDaemon) -> Self {
        let stream = TcpStream::connect(daemon.addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            write_half,
            next_sequence: 0,
        }
    }

    async fn send(&mut self, payload: Message) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let mut line = serde_json::to_vec(&Envelope::new(sequence, payload)).unwrap();
        line.push(b'\n');
        self.write_half.write_all(&line).await.unwrap();
        sequence
    }

    async fn recv(&mut self) -> Envelope {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn open(&mut self, path: WorkspacePath) -> OpenedFile {
        let sequence = self.send(Message::OpenFile(OpenFile { path })).await;
        let envelope = self.recv().await;
        assert_eq!(envelope.sequence, sequence);
        match envelope.payload {
            Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) }) => opened,
            other => panic!("expected successful open, got {other:?}"),
        }
    }
}

fn wpath(name: &str) -> WorkspacePath {
    WorkspacePath::new(RootId::new("project"), [name]).unwrap()
}

// =============================================================================
// File Operation Flows
// =============================================================================

#[tokio::test]
async fn test_open_read_write_create_full_flow() {
    let daemon = TestDaemon::start().await;
    let mut editor = Editor::connect(&daemon).await;

    // Ping works before anything else.
    let sequence = editor.send(Message::Ping(Ping { timestamp: 5 })).await;
    let envelope = editor.recv().await;
    assert_eq!(envelope.sequence, sequence);
    assert_eq!(envelope.payload, Message::Pong(Pong { timestamp: 5 }));

    // Open the seeded file and win its write capability.
    let opened = editor.open(wpath("a.txt")).await;
    assert_eq!(opened.content, b"hello");
    assert_eq!(opened.version, 0);
    assert!(opened.write_capability.is_some());

    // Write a new file through the passthrough path and read it back.
    editor
        .send(Message::WriteFile(WriteFile {
            path: wpath("b.txt"),
            content: b"fresh".to_vec(),
        }))
        .await;
    assert_eq!(
        editor.recv().await.payload,
        Message::WriteFileResult(WriteFileResult { result: Ok(()) })
    );
    assert_eq!(
        std::fs::read(daemon.workspace.path().join("b.txt")).unwrap(),
        b"fresh"
    );

    editor
        .send(Message::ReadFile(ReadFile {
            path: wpath("b.txt"),
        }))
        .await;
    match editor.recv().await.payload {
        Message::ReadFileResult(ReadFileResult { result: Ok(read) }) => {
            assert_eq!(read.content, b"fresh");
        }
        other => panic!("expected read result, got {other:?}"),
    }

    // Create a directory, then a file inside it.
    editor
        .send(Message::CreateFile(CreateFile {
            descriptor: CreateFileDescriptor {
                path: wpath("src"),
                kind: CreateKind::Directory,
            },
        }))
        .await;
    editor.recv().await;
    editor
        .send(Message::CreateFile(CreateFile {
            descriptor: CreateFileDescriptor {
                path: WorkspacePath::new(RootId::new("project"), ["src", "new.rs"]).unwrap(),
                kind: CreateKind::File,
            },
        }))
        .await;
    editor.recv().await;
    assert!(daemon.workspace.path().join("src/new.rs").is_file());
}

#[tokio::test]
async fn test_open_then_read_sees_identical_content() {
    let daemon = TestDaemon::start().await;
    let mut editor = Editor::connect(&daemon).await;

    let opened = editor.open(wpath("a.txt")).await;
    editor
        .send(Message::ReadFile(ReadFile {
            path: wpath("a.txt"),
        }))
        .await;
    match editor.recv().await.payload {
        Message::ReadFileResult(ReadFileResult { result: Ok(read) }) => {
            assert_eq!(read.content, opened.content);
        }
        other => panic!("expected read result, got {other:?}"),
    }
}

// =============================================================================
// Capability Arbitration
// =============================================================================

#[tokio::test]
async fn test_capability_contention_between_editors() {
    let daemon = TestDaemon::start().await;

    // First editor opens and wins the grant.
    let mut first = Editor::connect(&daemon).await;
    let opened = first.open(wpath("a.txt")).await;
    let reg1 = opened.write_capability.expect("first opener wins");

    // Second editor sees the shared buffer but no grant.
    let mut second = Editor::connect(&daemon).await;
    let opened = second.open(wpath("a.txt")).await;
    assert_eq!(opened.content, b"hello");
    assert!(opened.write_capability.is_none());

    // Second editor claims the capability explicitly.
    second
        .send(Message::AcquireCapability(AcquireCapability {
            capability: Capability::CanEdit(wpath("a.txt")),
        }))
        .await;

    // The first editor is told exactly which registration it lost.
    let notice = first.recv().await;
    assert_eq!(
        notice.payload,
        Message::CapabilityForceReleased(protocol::messages::CapabilityForceReleased {
            id: reg1.id
        })
    );

    // The second editor receives a fresh registration.
    match second.recv().await.payload {
        Message::CapabilityGranted(granted) => {
            assert_ne!(granted.registration.id, reg1.id);
            assert_eq!(
                granted.registration.capability,
                Capability::CanEdit(wpath("a.txt"))
            );
        }
        other => panic!("expected grant, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_file_frees_the_grant() {
    let daemon = TestDaemon::start().await;

    let mut first = Editor::connect(&daemon).await;
    let opened = first.open(wpath("a.txt")).await;
    let reg1 = opened.write_capability.expect("first opener wins");

    first
        .send(Message::CloseFile(CloseFile {
            path: wpath("a.txt"),
        }))
        .await;
    first.recv().await;

    // The path is vacant again; a second editor's open is auto-granted.
    let mut second = Editor::connect(&daemon).await;
    let reopened = second.open(wpath("a.txt")).await;
    let reg2 = reopened.write_capability.expect("vacant path grants again");
    assert_ne!(reg2.id, reg1.id);
}

#[tokio::test]
async fn test_disconnect_frees_the_grant() {
    let daemon = TestDaemon::start().await;

    let mut first = Editor::connect(&daemon).await;
    let opened = first.open(wpath("a.txt")).await;
    assert!(opened.write_capability.is_some());

    // Dropping the connection stands in for an editor crash.
    drop(first);

    // The daemon processes the disconnect shortly after; a new editor
    // then wins the grant on open.
    let mut second = Editor::connect(&daemon).await;
    for _ in 0..50 {
        let opened = second.open(wpath("a.txt")).await;
        if opened.write_capability.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("capability was never released after disconnect");
}
