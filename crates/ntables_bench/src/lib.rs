//! Benchmark utilities.

#![warn(missing_docs)]

use ntables_core::{EntryFlags, EntryValue, PENDING_ID};
use ntables_protocol::{EntryAssignment, EntryUpdate, Message};
use rand::Rng;

/// Generate a random value of every kind, cycling through the types.
pub fn random_value(kind: usize) -> EntryValue {
    let mut rng = rand::thread_rng();
    match kind % 7 {
        0 => EntryValue::Boolean(rng.gen()),
        1 => EntryValue::Double(rng.gen()),
        2 => EntryValue::String(format!("value-{}", rng.gen::<u32>())),
        3 => EntryValue::Raw((0..32).map(|_| rng.gen()).collect()),
        4 => EntryValue::BooleanArray((0..16).map(|_| rng.gen()).collect()),
        5 => EntryValue::DoubleArray((0..16).map(|_| rng.gen()).collect()),
        _ => EntryValue::StringArray((0..8).map(|i| format!("item-{i}")).collect()),
    }
}

/// Generate `count` pending assignments with mixed value types.
pub fn generate_assignments(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            Message::EntryAssignment(EntryAssignment::new(
                format!("/bench/entry/{i}"),
                PENDING_ID,
                0,
                EntryFlags::default(),
                random_value(i),
            ))
        })
        .collect()
}

/// Generate `count` double updates spread over `entries` ids.
pub fn generate_updates(count: usize, entries: u16) -> Vec<Message> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let id = (i % usize::from(entries.max(1))) as u16;
            let seq = (i / usize::from(entries.max(1)) + 1) as u16;
            Message::EntryUpdate(EntryUpdate::new(id, seq, EntryValue::Double(rng.gen())))
        })
        .collect()
}

/// Encode `messages` back to back, as they would arrive on a socket.
pub fn encode_stream(messages: &[Message]) -> Vec<u8> {
    let mut out = Vec::new();
    for message in messages {
        if let Ok(bytes) = message.encode() {
            out.extend_from_slice(&bytes);
        }
    }
    out
}
