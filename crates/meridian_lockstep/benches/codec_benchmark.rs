//! Benchmark for the wire codec and state transfer.
//!
//! Run with: cargo bench --package meridian_lockstep --bench codec_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use meridian_lockstep::protocol::{
    CommandBatch, LobbySlot, LobbyState, LobbyUpdate, TickSync,
};
use meridian_lockstep::session::split_state;
use meridian_lockstep::{Envelope, Message, PeerId, ProvinceCommand, ProvinceSimulation, Simulation, SpeedLevel};

fn command_envelope() -> Envelope {
    let commands: Vec<ProvinceCommand> = (0..32u16)
        .map(|i| ProvinceCommand {
            province: i,
            delta: i32::from(i) * 3 - 40,
        })
        .collect();
    Envelope {
        target_tick: 120_000,
        message: Message::CommandBatch(CommandBatch {
            origin: PeerId(3),
            sequence: 917,
            data: ProvinceCommand::encode_batch(&commands),
        }),
    }
}

fn lobby_envelope() -> Envelope {
    let slots = (0..16)
        .map(|i| LobbySlot {
            peer_id: PeerId(i),
            country_id: 100 + i as u16,
            is_ready: i % 2 == 0,
            is_host: i == 0,
        })
        .collect();
    Envelope {
        target_tick: 0,
        message: Message::LobbyUpdate(LobbyUpdate {
            state: LobbyState::Waiting,
            slots,
        }),
    }
}

fn benchmark_encode(c: &mut Criterion) {
    let batch = command_envelope();
    let sync = Envelope {
        target_tick: 120_000,
        message: Message::TickSync(TickSync {
            current_tick: 120_000,
            effective_speed: SpeedLevel(3),
            is_paused: false,
        }),
    };
    let lobby = lobby_envelope();

    c.bench_function("encode_command_batch_32", |b| {
        b.iter(|| black_box(batch.encode()))
    });
    c.bench_function("encode_tick_sync", |b| b.iter(|| black_box(sync.encode())));
    c.bench_function("encode_lobby_16_slots", |b| {
        b.iter(|| black_box(lobby.encode()))
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let batch = command_envelope().encode().unwrap();
    let lobby = lobby_envelope().encode().unwrap();

    c.bench_function("decode_command_batch_32", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&batch))))
    });
    c.bench_function("decode_lobby_16_slots", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&lobby))))
    });
}

fn benchmark_state_transfer(c: &mut Criterion) {
    let mut sim = ProvinceSimulation::new(11, 4_096);
    for _ in 0..100 {
        sim.advance_one_tick();
    }
    let state = sim.serialize_full_state();

    c.bench_function("split_state_32k_lz4", |b| {
        b.iter(|| black_box(split_state(black_box(&state), 16 * 1024, true)))
    });
    c.bench_function("split_state_32k_raw", |b| {
        b.iter(|| black_box(split_state(black_box(&state), 16 * 1024, false)))
    });
    c.bench_function("state_checksum_4096_provinces", |b| {
        b.iter(|| black_box(sim.compute_state_checksum()))
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_decode,
    benchmark_state_transfer
);
criterion_main!(benches);
