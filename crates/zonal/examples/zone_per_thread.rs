//! Zone-per-thread: one worker owns a zone, others talk to it by message.
//!
//! No lock is needed because only the worker ever touches its zone.
//! Clients send commands over a `crossbeam-channel` and receive offsets
//! and copies of payloads back.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zonal::prelude::*;

enum Command {
    Store {
        bytes: Vec<u8>,
        reply: Sender<Result<Offset, ZoneError>>,
    },
    Load {
        at: Offset,
        len: usize,
        reply: Sender<Vec<u8>>,
    },
    Release {
        at: Offset,
    },
    Report {
        reply: Sender<(ZoneStats, bool)>,
    },
}

fn worker(zone: Zone, commands: crossbeam_channel::Receiver<Command>) {
    let mut zone = zone;
    for command in commands {
        match command {
            Command::Store { bytes, reply } => {
                let stored = match zone.try_allocate(bytes.len()) {
                    Ok(at) => Ok(at),
                    Err(ZoneError::OutOfMemory { .. }) => {
                        warn!(len = bytes.len(), "zone full, growing");
                        zone = zone.grow_for(bytes.len()).unwrap();
                        zone.try_allocate(bytes.len())
                    }
                    Err(e) => Err(e),
                };
                if let Ok(at) = stored {
                    zone.payload_mut(at)[..bytes.len()].copy_from_slice(&bytes);
                }
                let _ = reply.send(stored);
            }
            Command::Load { at, len, reply } => {
                let _ = reply.send(zone.payload(at)[..len].to_vec());
            }
            Command::Release { at } => zone.free(at),
            Command::Report { reply } => {
                let _ = reply.send((zone.stats(), zone.check_heap()));
            }
        }
    }
    info!(capacity = zone.capacity(), "worker exiting");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (tx, rx) = unbounded();
    let zone = Zone::create(512).unwrap();
    let handle = thread::spawn(move || worker(zone, rx));

    let mut stored = Vec::new();
    for n in 0..24 {
        let bytes = format!("record #{n:02}").into_bytes();
        let (reply, answer) = bounded(1);
        tx.send(Command::Store {
            bytes: bytes.clone(),
            reply,
        })
        .unwrap();
        stored.push((answer.recv().unwrap().unwrap(), bytes));
    }

    for (at, expected) in &stored {
        let (reply, answer) = bounded(1);
        tx.send(Command::Load {
            at: *at,
            len: expected.len(),
            reply,
        })
        .unwrap();
        assert_eq!(&answer.recv().unwrap(), expected);
    }

    for (at, _) in stored.iter().filter(|(at, _)| at.get() % 3 == 0) {
        tx.send(Command::Release { at: *at }).unwrap();
    }

    let (reply, answer) = bounded(1);
    tx.send(Command::Report { reply }).unwrap();
    let (stats, consistent) = answer.recv().unwrap();
    info!(
        capacity = stats.capacity,
        blocks = stats.block_count,
        free_blocks = stats.free_block_count,
        consistent,
        "worker zone"
    );

    drop(tx);
    handle.join().unwrap();
}
