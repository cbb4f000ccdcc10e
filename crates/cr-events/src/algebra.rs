//! Pure rewrite rules that collapse a per-file event sequence into its
//! minimal equivalent (spec §4.1).
//!
//! `normalize` is a pure function: no I/O, no shared state, deterministic
//! and idempotent. It is exercised directly by property tests below rather
//! than through the subscriber or hub.

use std::collections::HashMap;

use crate::event::{Event, EventType};

/// Accumulated state for one `file_id` while folding over the event
/// sequence. `base` mirrors the "accumulator `base_type`" column of the
/// rewrite table; `original_src`/`current_dst` track the endpoints needed
/// to detect a rename round-trip and to emit the final event.
#[derive(Debug, Clone)]
struct Accumulator {
    base: EventType,
    original_src: String,
    current_dst: String,
}

/// Normalize a time-ordered event sequence into its minimal equivalent.
///
/// Output preserves first-appearance order of `file_id` in the input.
/// Entries dropped by the round-trip or ephemeral-creation rules are
/// omitted entirely.
#[must_use]
pub fn normalize(events: &[Event]) -> Vec<Event> {
    let mut order: Vec<String> = Vec::new();
    let mut table: HashMap<String, Option<Accumulator>> = HashMap::new();

    for event in events {
        if !table.contains_key(&event.file_id) {
            order.push(event.file_id.clone());
        }
        let current = table.remove(&event.file_id).flatten();
        let next = apply(current, event);
        table.insert(event.file_id.clone(), next);
    }

    order
        .into_iter()
        .filter_map(|file_id| {
            let accumulator = table.remove(&file_id).flatten()?;
            Some(accumulator.into_event(file_id))
        })
        .collect()
}

impl Accumulator {
    fn into_event(self, file_id: String) -> Event {
        match self.base {
            EventType::Rename => Event::rename(file_id, self.original_src, self.current_dst),
            other => Event::new(other, file_id, self.original_src),
        }
    }
}

/// Apply one incoming event to the current per-file accumulator, returning
/// the next accumulator state (`None` means the entry is dropped).
fn apply(current: Option<Accumulator>, incoming: &Event) -> Option<Accumulator> {
    let Some(acc) = current else {
        // (none) + any X -> base=X, src=from, dst=to
        return Some(Accumulator {
            base: incoming.kind,
            original_src: incoming.from.clone(),
            current_dst: incoming.to.clone(),
        });
    };

    match (acc.base, incoming.kind) {
        // Delete + Create -> base=Create, src=from, dst=∅ (restore)
        (EventType::Delete, EventType::Create) => Some(Accumulator {
            base: EventType::Create,
            original_src: incoming.from.clone(),
            current_dst: String::new(),
        }),

        // Create + Modify -> no change (Create implies content)
        (EventType::Create, EventType::Modify) => Some(acc),

        // Modify + Modify -> no change (keep latest)
        (EventType::Modify, EventType::Modify) => Some(acc),

        // Rename + Modify -> no change (Rename absorbs Modify)
        (EventType::Rename, EventType::Modify) => Some(acc),

        // Delete + Modify -> ignore (should not happen)
        (EventType::Delete, EventType::Modify) => Some(acc),

        // Create + Rename(a→b) -> base=Create, src=b
        (EventType::Create, EventType::Rename) => Some(Accumulator {
            base: EventType::Create,
            original_src: incoming.to.clone(),
            current_dst: String::new(),
        }),

        // Modify + Rename(a→b) -> base=Rename, src=a, dst=b
        (EventType::Modify, EventType::Rename) => Some(Accumulator {
            base: EventType::Rename,
            original_src: incoming.from.clone(),
            current_dst: incoming.to.clone(),
        }),

        // Rename(a→b) + Rename(b→c) -> if c = original_src: drop (round trip);
        // else dst=c
        (EventType::Rename, EventType::Rename) => {
            if incoming.to == acc.original_src {
                None
            } else {
                Some(Accumulator {
                    current_dst: incoming.to.clone(),
                    ..acc
                })
            }
        }

        // Delete + Rename -> ignore
        (EventType::Delete, EventType::Rename) => Some(acc),

        // Create + Delete -> drop (ephemeral)
        (EventType::Create, EventType::Delete) => None,

        // Modify + Delete -> base=Delete, src=from
        (EventType::Modify, EventType::Delete) => Some(Accumulator {
            base: EventType::Delete,
            original_src: incoming.from.clone(),
            current_dst: String::new(),
        }),

        // Rename + Delete -> base=Delete, src=from
        (EventType::Rename, EventType::Delete) => Some(Accumulator {
            base: EventType::Delete,
            original_src: incoming.from.clone(),
            current_dst: String::new(),
        }),

        // Delete + Delete -> no change
        (EventType::Delete, EventType::Delete) => Some(acc),
    }
}
