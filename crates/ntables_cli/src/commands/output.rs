//! Event rendering shared by the `server` and `client` commands.

use super::CliError;
use ntables_core::{EventSource, ParticipantEvent};
use serde::Serialize;
use std::str::FromStr;
use tokio::sync::broadcast;

/// How events are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per event.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::InvalidFormat(other.to_string())),
        }
    }
}

/// A JSON event line.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    participant: &'a str,
    #[serde(flatten)]
    event: &'a ParticipantEvent,
}

/// Renders one event for printing.
pub fn render(participant: &str, event: &ParticipantEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let record = EventRecord { participant, event };
            serde_json::to_string(&record)
                .unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"))
        }
        OutputFormat::Text => render_text(participant, event),
    }
}

fn render_text(participant: &str, event: &ParticipantEvent) -> String {
    let origin = match event.source() {
        Some(EventSource::Local) => " (local)",
        Some(EventSource::Remote) => " (remote)",
        None => "",
    };
    let line = match event {
        ParticipantEvent::EntryAdded(e) => {
            format!("added {} [{}] = {}", e.entry.name, e.entry.id, e.entry.value)
        }
        ParticipantEvent::EntryUpdated(e) => {
            format!("updated {} = {} (seq {})", e.entry.name, e.entry.value, e.entry.seq)
        }
        ParticipantEvent::EntryDeleted(e) => format!("deleted {}", e.entry.name),
        ParticipantEvent::EntryFlagsUpdated(e) => format!(
            "flags {} persistent={}",
            e.entry.name, e.entry.flags.persistent
        ),
        ParticipantEvent::ConnectionStateChanged { old, new } => format!("{old} -> {new}"),
        ParticipantEvent::ProtocolRejected { version } => {
            format!("server rejected protocol, it speaks {version}")
        }
        ParticipantEvent::ReconnectAttempt { attempt } => format!("reconnect attempt {attempt}"),
    };
    format!("[{participant}] {line}{origin}")
}

/// Prints events until Ctrl-C.
pub async fn print_until_ctrl_c(
    participant: &str,
    mut events: broadcast::Receiver<ParticipantEvent>,
    format: OutputFormat,
) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(event) => println!("{}", render(participant, &event, format)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntables_core::{ConnectionState, Entry, EntryEvent, EntryValue};

    fn added() -> ParticipantEvent {
        ParticipantEvent::EntryAdded(EntryEvent::remote(Entry::new(
            "/speed",
            3,
            0,
            EntryValue::Double(0.5),
        )))
    }

    #[test]
    fn parse_format() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn text_lines() {
        let line = render("server", &added(), OutputFormat::Text);
        assert!(line.starts_with("[server] added /speed [3]"));
        assert!(line.ends_with("(remote)"));

        let change = ParticipantEvent::ConnectionStateChanged {
            old: ConnectionState::NotConnected,
            new: ConnectionState::Connecting,
        };
        let line = render("client", &change, OutputFormat::Text);
        assert!(line.starts_with("[client] "));
        assert!(!line.contains("remote"));
    }

    #[test]
    fn json_lines() {
        let line = render("server", &added(), OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["participant"], "server");
        assert_eq!(parsed["event"], "entry_added");
        assert_eq!(parsed["entry"]["name"], "/speed");
    }
}
