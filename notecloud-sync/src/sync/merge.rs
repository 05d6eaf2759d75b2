use std::collections::HashMap;

use crate::model::{Note, stamp_millis};

/// Merges the remote note collection into the local one: a union keyed by
/// note id with last-writer-wins on collision. A strictly newer remote entry
/// replaces the local one in place; ties keep local. There is no tombstone
/// concept — a note deleted on one device reappears if another device still
/// has it, which is accepted behavior.
pub fn merge_notes(local: &[Note], remote: &[Note]) -> Vec<Note> {
    let mut merged = local.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(position, note)| (note.id.clone(), position))
        .collect();

    for remote_note in remote {
        match index.get(&remote_note.id) {
            Some(&position) => {
                let local_stamp = stamp_millis(merged[position].updated_at.as_ref());
                let remote_stamp = stamp_millis(remote_note.updated_at.as_ref());
                if remote_stamp > local_stamp {
                    merged[position] = remote_note.clone();
                }
            }
            None => {
                index.insert(remote_note.id.clone(), merged.len());
                merged.push(remote_note.clone());
            }
        }
    }

    merged
}
