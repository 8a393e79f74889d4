//! `ntables client`: connect, publish `--set` values, print events.

use super::output::{print_until_ctrl_c, OutputFormat};
use super::CliError;
use ntables_client::{Client, ClientConfig};
use ntables_core::{Endpoint, EntryValue, Participant};
use tracing::{info, warn};

/// Parses `KEY=VALUE`. The value is a boolean if it reads as one, then a
/// number, otherwise a string.
pub fn parse_assignment(input: &str) -> Result<(String, EntryValue), CliError> {
    let (key, raw) = input
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| CliError::InvalidAssignment(input.to_string()))?;
    Ok((key.to_string(), parse_value(raw)))
}

fn parse_value(raw: &str) -> EntryValue {
    if let Ok(flag) = raw.parse::<bool>() {
        return EntryValue::Boolean(flag);
    }
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => EntryValue::Double(number),
        _ => EntryValue::String(raw.to_string()),
    }
}

/// Runs the client command.
pub async fn run(
    address: &str,
    port: u16,
    identity: &str,
    sets: &[String],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let assignments = sets
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<Result<Vec<_>, _>>()?;

    let endpoint = Endpoint::parse(address, port)?;
    let client = Client::new(ClientConfig::new(identity, endpoint.clone()));
    let events = client.subscribe();

    for (key, value) in assignments {
        if !client.set_entry_value(&key, value) {
            warn!(key = %key, "value rejected, entry has another type");
        }
    }

    client.start();
    info!(%endpoint, "connecting, press Ctrl-C to stop");
    print_until_ctrl_c("client", events, format).await;

    client.stop();
    Ok(())
}
