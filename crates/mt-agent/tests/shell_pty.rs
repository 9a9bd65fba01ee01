//! Bridge running a real /bin/sh on a pseudo-terminal
#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;

use mt_agent::pty::{Bridge, BridgeOptions, CloseOutcome, RECOVERY_RESET};
use mt_protocol::{SessionMessage, TerminalSize};

fn start() -> (Bridge, mpsc::Receiver<SessionMessage>) {
    let mut bridge = Bridge::spawn(BridgeOptions::new(Some("/bin/sh"))).unwrap();
    let output = bridge.take_output().unwrap();
    (bridge, output)
}

/// Collect output text until it contains `needle`
async fn wait_for_text(output: &mut mpsc::Receiver<SessionMessage>, needle: &str) -> String {
    let mut seen = String::new();
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(message) = output.recv().await {
            if let SessionMessage::Data(bytes) = message {
                seen.push_str(&String::from_utf8_lossy(&bytes));
                if seen.contains(needle) {
                    return true;
                }
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "never saw {:?} in {:?}", needle, seen);
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_command_output_round_trip() {
    let (bridge, mut output) = start();
    assert!(bridge.pid().is_some());

    // The echoed command line shows the expression, only the result shows 42.
    bridge
        .input()
        .send(SessionMessage::data(&b"echo mt-$((40+2))\n"[..]))
        .await
        .unwrap();
    wait_for_text(&mut output, "mt-42").await;

    assert_eq!(bridge.close().await, CloseOutcome::Drained);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resize_reaches_the_device() {
    let (bridge, _output) = start();

    bridge
        .input()
        .send(SessionMessage::resize(40, 120))
        .await
        .unwrap();

    let expected = TerminalSize::new(40, 120);
    let applied = tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.window_size() != Some(expected) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(applied.is_ok());
    assert_eq!(bridge.size(), expected);

    bridge.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exited_shell_is_replaced() {
    let (bridge, mut output) = start();
    let first = bridge.pid();

    bridge
        .input()
        .send(SessionMessage::data(&b"exit\n"[..]))
        .await
        .unwrap();

    let fault = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match output.recv().await {
                Some(SessionMessage::Fault { recovery, .. }) => return Some(recovery),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(fault.as_deref(), Some(RECOVERY_RESET));
    assert!(bridge.pid().is_some());
    assert_ne!(bridge.pid(), first);

    bridge
        .input()
        .send(SessionMessage::data(&b"echo back-$((1+1))\n"[..]))
        .await
        .unwrap();
    wait_for_text(&mut output, "back-2").await;

    bridge.close().await;
}
