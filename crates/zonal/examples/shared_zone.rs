//! Several producer threads sharing one zone behind a lock.
//!
//! Each producer stores short messages in the zone and hands the offsets
//! back. The main thread then reads every message, frees half of them,
//! and prints the heap.
//!
//! Run with `RUST_LOG=zonal_zone=debug` to see zone lifecycle events.

use std::thread;

use tracing::info;
use tracing_subscriber::EnvFilter;
use zonal::prelude::*;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let shared = SharedZone::create(2048).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|id| {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("producer-{id}"))
                .spawn(move || {
                    let mut offsets = Vec::new();
                    for n in 0..8 {
                        let msg = format!("producer {id} message {n}");
                        // Grow under the same lock when the zone is full.
                        let at = shared
                            .with(|zone| {
                                if !zone.has_free_block(msg.len()) {
                                    let target = zone.capacity() * 2;
                                    zone.grow_in_place(target)?;
                                }
                                let at = zone.try_allocate(msg.len())?;
                                zone.payload_mut(at)[..msg.len()].copy_from_slice(msg.as_bytes());
                                Ok::<_, ZoneError>((at, msg.len()))
                            })
                            .unwrap()
                            .unwrap();
                        offsets.push(at);
                    }
                    offsets
                })
                .unwrap()
        })
        .collect();

    let stored: Vec<(Offset, usize)> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let mut zone = shared.lock().unwrap();
    for (at, len) in &stored {
        let text = String::from_utf8_lossy(&zone.payload(*at)[..*len]).into_owned();
        info!(offset = %at, "{text}");
    }
    for (at, _) in stored.iter().step_by(2) {
        zone.free(*at);
    }

    let stats = zone.stats();
    info!(
        capacity = stats.capacity,
        used = stats.used_bytes,
        free = stats.free_bytes,
        fragmentation = stats.fragmentation(),
        "after freeing half"
    );
    println!("{}", zone.dump_heap());
    assert!(zone.check_heap());
}
