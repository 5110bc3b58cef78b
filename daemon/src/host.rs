/// Line-delimited JSON bridge to the host application.
///
/// Requests arrive on stdin, one JSON object per line, tagged by `"request"`.
/// Notifications leave on stdout, one JSON object per line, tagged by `"event"`.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::event::DaemonEvent;
use crate::playtime::GameTime;
use crate::reconcile::LocalGame;
use crate::registry::Game;

/// Commands the host can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum HostRequest {
    Launch { game_id: String },
    GetOwnedGames,
    GetLocalGames,
    GetLocalSizes,
    GetGameTimes,
    Shutdown,
}

/// Notifications sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    LocalGameStatusChanged(LocalGame),
    GameTimeUpdated(GameTime),
    OwnedGames { games: Vec<Game> },
    LocalGames { local_games: Vec<LocalGame> },
    LocalSizes { sizes: BTreeMap<String, u64> },
    GameTimes { game_times: Vec<GameTime> },
    LaunchFailed { game_id: String, reason: String },
}

/// Sending half used by every component that notifies the host.
pub type HostSender = mpsc::UnboundedSender<HostEvent>;

/// Sends `event`, logging instead of failing when the writer is gone.
pub fn notify(tx: &HostSender, event: HostEvent) {
    if tx.send(event).is_err() {
        debug!("Host writer closed; dropping event");
    }
}

/// Reads requests from `reader` until EOF and forwards them to the event loop.
/// Lines that are not UTF-8 or do not parse are logged and skipped. EOF means
/// the host went away, so a `Shutdown` follows.
///
/// Blocking: run it on a dedicated thread, not on the runtime.
pub fn read_requests<R: BufRead>(mut reader: R, tx: mpsc::Sender<DaemonEvent>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Failed to read host input: {e}");
                break;
            }
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(l) => l.trim(),
            Err(e) => {
                warn!("Ignoring host request that is not UTF-8: {e}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostRequest>(line) {
            Ok(request) => {
                debug!(?request, "Host request");
                if tx.blocking_send(DaemonEvent::Host(request)).is_err() {
                    return;
                }
            }
            Err(e) => warn!(line, "Ignoring malformed host request: {e}"),
        }
    }
    debug!("Host input closed");
    let _ = tx.blocking_send(DaemonEvent::Shutdown);
}

/// Writes every event from `rx` to `writer` as one JSON line.
pub async fn write_events<W>(mut rx: mpsc::UnboundedReceiver<HostEvent>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to serialize host event: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            error!("Failed to write host event: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("Failed to flush host output: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::LocalGameState;

    // ── requests ─────────────────────────────────────────────────────────────

    #[test]
    fn launch_request_parses() {
        let req: HostRequest =
            serde_json::from_str(r#"{"request":"launch","game_id":"3030-42"}"#).unwrap();
        assert_eq!(req, HostRequest::Launch { game_id: "3030-42".to_string() });
    }

    #[test]
    fn unit_requests_parse() {
        let req: HostRequest = serde_json::from_str(r#"{"request":"get_local_games"}"#).unwrap();
        assert_eq!(req, HostRequest::GetLocalGames);
        let req: HostRequest = serde_json::from_str(r#"{"request":"shutdown"}"#).unwrap();
        assert_eq!(req, HostRequest::Shutdown);
    }

    #[test]
    fn read_requests_skips_garbage_and_blank_lines() {
        let input: &[u8] = b"{\"request\":\"get_game_times\"}\n\nnot json\n{\"request\":\"nope\"}\n{\"request\":\"launch\",\"game_id\":\"1\"}\n";
        let (tx, mut rx) = mpsc::channel(8);
        read_requests(input, tx);

        let mut got = Vec::new();
        let mut saw_shutdown = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                DaemonEvent::Host(req) => got.push(req),
                DaemonEvent::Shutdown => saw_shutdown = true,
                _ => panic!("unexpected event"),
            }
        }
        assert!(saw_shutdown);
        assert_eq!(
            got,
            vec![
                HostRequest::GetGameTimes,
                HostRequest::Launch { game_id: "1".to_string() },
            ]
        );
    }

    #[test]
    fn read_requests_survives_invalid_utf8() {
        let input: &[u8] = b"\xff\xfe garbage\n{\"request\":\"get_game_times\"}\n";
        let (tx, mut rx) = mpsc::channel(8);
        read_requests(input, tx);

        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::Host(HostRequest::GetGameTimes))
        ));
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::Shutdown)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_requests_accepts_last_line_without_newline() {
        let input: &[u8] = b"{\"request\":\"get_local_sizes\"}";
        let (tx, mut rx) = mpsc::channel(8);
        read_requests(input, tx);

        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::Host(HostRequest::GetLocalSizes))
        ));
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::Shutdown)));
    }

    // ── events ───────────────────────────────────────────────────────────────

    #[test]
    fn local_game_event_is_flat() {
        let ev = HostEvent::LocalGameStatusChanged(LocalGame::new("1", LocalGameState::INSTALLED));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "local_game_status_changed");
        assert_eq!(json["game_id"], "1");
        assert_eq!(json["local_game_state"], 1);
    }

    #[test]
    fn game_time_event_keeps_null_last_played() {
        let ev = HostEvent::GameTimeUpdated(GameTime {
            game_id: "1".to_string(),
            time_played: 12,
            last_time_played: None,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "game_time_updated");
        assert_eq!(json["time_played"], 12);
        assert!(json["last_time_played"].is_null());
    }

    #[tokio::test]
    async fn write_events_emits_one_line_per_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        notify(&tx, HostEvent::LaunchFailed { game_id: "1".to_string(), reason: "busy".to_string() });
        notify(&tx, HostEvent::LocalSizes { sizes: BTreeMap::from([("1".to_string(), 40_976)]) });
        drop(tx);

        let mut out = Vec::new();
        write_events(rx, &mut out).await;

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "launch_failed");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["sizes"]["1"], 40_976);
    }
}
