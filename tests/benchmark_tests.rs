//! Performance benchmarks for the server core primitives

use rand::Rng;
use server::clock::ManualClock;
use server::heap::PriorityQueue;
use server::job_queue::JobQueue;
use server::tick_scheduler::TickScheduler;
use shared::packets::{EntityInfo, RoomJoined, KIND_MONSTER};
use shared::{decode_frames, encode_message, Packet, RecvBuffer, RECV_BUFFER_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Benchmarks heap push/pop with random keys
#[test]
fn benchmark_priority_queue() {
    let mut rng = rand::thread_rng();
    let keys: Vec<u64> = (0..100_000).map(|_| rng.gen()).collect();

    let start = Instant::now();
    let mut heap = PriorityQueue::with_capacity(keys.len());
    for key in &keys {
        heap.push(*key);
    }
    let mut last = 0;
    while let Some(key) = heap.pop() {
        assert!(key >= last);
        last = key;
    }
    let duration = start.elapsed();

    println!(
        "Priority queue: {} push+pop in {:?} ({:.2} ns/op)",
        keys.len(),
        duration,
        duration.as_nanos() as f64 / (keys.len() * 2) as f64
    );

    // Should complete in under 2 seconds even unoptimized
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks job queue throughput with contending producers
#[test]
fn benchmark_job_queue_contention() {
    const PRODUCERS: usize = 8;
    const JOBS: usize = 25_000;

    let queue = Arc::new(JobQueue::new("bench", 0u64));
    let start = Instant::now();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..JOBS {
                    queue.push(|total: &mut u64| *total += 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = Arc::new(AtomicUsize::new(0));
    let total_clone = Arc::clone(&total);
    queue.push(move |count: &mut u64| total_clone.store(*count as usize, Ordering::SeqCst));

    let duration = start.elapsed();
    println!(
        "Job queue: {} jobs from {} producers in {:?} ({:.2} ns/job)",
        PRODUCERS * JOBS,
        PRODUCERS,
        duration,
        duration.as_nanos() as f64 / (PRODUCERS * JOBS) as f64
    );

    assert_eq!(total.load(Ordering::SeqCst), PRODUCERS * JOBS);
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks decoding a stream of coalesced frames through the receive window
#[test]
fn benchmark_frame_decoding() {
    let frame = encode_message(&RoomJoined {
        player_id: 1,
        room: 0,
        entities: (0..10)
            .map(|i| EntityInfo {
                id: 1_000_000 + i,
                kind: KIND_MONSTER,
                name: format!("monster{}", i),
                x: i as f32,
                y: -(i as f32),
                hp: 60,
            })
            .collect(),
    })
    .unwrap();

    let frames = 50_000;
    let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * frames).collect();

    let start = Instant::now();
    let mut buffer = RecvBuffer::new(RECV_BUFFER_SIZE);
    let mut offset = 0;
    let mut decoded = 0;

    while offset < stream.len() {
        buffer.compact();
        let chunk = buffer.free_size().min(stream.len() - offset).min(1460);
        buffer.write_segment()[..chunk].copy_from_slice(&stream[offset..offset + chunk]);
        assert!(buffer.on_write(chunk));
        offset += chunk;

        let consumed = decode_frames(buffer.read_segment(), buffer.capacity(), |bytes| {
            assert_eq!(bytes.len(), frame.len());
            decoded += 1;
        })
        .unwrap();
        assert!(buffer.on_read(consumed));
    }

    let duration = start.elapsed();
    println!(
        "Frame decoding: {} frames ({} bytes) in {:?} ({:.2} MB/s)",
        decoded,
        stream.len(),
        duration,
        stream.len() as f64 / duration.as_secs_f64() / 1_000_000.0
    );

    assert_eq!(decoded, frames);
    assert_eq!(buffer.data_size(), 0);
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks full message decode into typed packets
#[test]
fn benchmark_packet_decode() {
    let frame = encode_message(&shared::packets::Moved {
        id: 42,
        x: 1.5,
        y: 2.5,
    })
    .unwrap();

    let iterations = 100_000;
    let start = Instant::now();
    for _ in 0..iterations {
        match Packet::decode(&frame) {
            Ok(Packet::Moved(_)) => {}
            other => panic!("Unexpected decode result {:?}", other),
        }
    }
    let duration = start.elapsed();

    println!(
        "Packet decode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks flushing a large backlog of timers
#[test]
fn benchmark_tick_scheduler_flush() {
    let clock = Arc::new(ManualClock::new());
    let scheduler = TickScheduler::new(clock.clone());
    let fired = Arc::new(AtomicUsize::new(0));
    let mut rng = rand::thread_rng();

    let timers = 50_000;
    for _ in 0..timers {
        let fired = Arc::clone(&fired);
        scheduler.push_after(rng.gen_range(0..1000), move || {
            fired.fetch_add(1, Ordering::Relaxed);
        });
    }

    let start = Instant::now();
    clock.advance(Duration::from_secs(1));
    let executed = scheduler.flush();
    let duration = start.elapsed();

    println!(
        "Tick scheduler: flushed {} timers in {:?} ({:.2} ns/timer)",
        executed,
        duration,
        duration.as_nanos() as f64 / executed as f64
    );

    assert_eq!(executed, timers);
    assert_eq!(fired.load(Ordering::Relaxed), timers);
    assert!(duration.as_millis() < 2000);
}
