//! # Lockstep Session Simulator
//!
//! Runs one host and a handful of clients over the in-process transport,
//! each driving its own [`ProvinceSimulation`], and reports whether they
//! stayed in agreement.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=meridian_lockstep=info lockstep_sim --ticks 3000 --clients 3 --seed 7
//! ```

use std::time::Duration;

use meridian_lockstep::{
    Coordinator, LocalNetwork, LocalTransport, ProvinceCommand, ProvinceSimulation,
    SessionConfig, SessionEvent, Simulation,
};
use meridian_shared::DEFAULT_PORT;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

const PROVINCES: usize = 64;

/// Frames between command submissions of one participant.
const COMMAND_PERIOD: u64 = 7;

struct Participant {
    name: String,
    coordinator: Coordinator<LocalTransport>,
    sim: ProvinceSimulation,
    desyncs: u32,
    verified: u32,
}

impl Participant {
    fn new(
        name: String,
        network: &LocalNetwork,
        config: &SessionConfig,
        seed: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            name,
            coordinator: Coordinator::new(network.endpoint(), config.clone())?,
            sim: ProvinceSimulation::new(seed, PROVINCES),
            desyncs: 0,
            verified: 0,
        })
    }

    fn update(&mut self, frame: Duration) {
        self.coordinator.update(&mut self.sim, frame);
        for event in self.coordinator.drain_events() {
            match event {
                SessionEvent::DesyncDetected { peer, tick, .. } => {
                    tracing::error!("{}: desync with {} at tick {}", self.name, peer, tick);
                    self.desyncs += 1;
                }
                SessionEvent::ChecksumVerified { .. } => self.verified += 1,
                SessionEvent::SessionEnded => tracing::warn!("{}: session ended", self.name),
                _ => {}
            }
        }
    }

    fn submit_random(&mut self, rng: &mut ChaCha8Rng) -> Result<(), Box<dyn std::error::Error>> {
        let count = rng.gen_range(1..=4);
        let commands: Vec<ProvinceCommand> = (0..count)
            .map(|_| ProvinceCommand {
                province: rng.gen_range(0..PROVINCES as u16),
                delta: rng.gen_range(-50..=50),
            })
            .collect();
        let tick = self.coordinator.command_tick();
        self.coordinator
            .submit_command_batch(&ProvinceCommand::encode_batch(&commands), tick)?;
        Ok(())
    }
}

fn print_usage() {
    println!("Usage: lockstep_sim [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -t, --ticks <N>        Host ticks to run (default: 3000)");
    println!("  -c, --clients <N>      Number of clients (default: 2)");
    println!("  -s, --seed <N>         World and command seed (default: 7)");
    println!("      --config <PATH>    Session config TOML");
    println!("  -h, --help             Show this help");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut target_ticks = 3_000u64;
    let mut client_count = 2usize;
    let mut seed = 7u64;
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ticks" | "-t" => {
                if i + 1 < args.len() {
                    target_ticks = args[i + 1].parse().unwrap_or(target_ticks);
                    i += 1;
                }
            }
            "--clients" | "-c" => {
                if i + 1 < args.len() {
                    client_count = args[i + 1].parse().unwrap_or(client_count);
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    seed = args[i + 1].parse().unwrap_or(seed);
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => tracing::warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    let mut config = match &config_path {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    config.require_all_ready = false;

    let network = LocalNetwork::new();
    let mut host = Participant::new("host".to_owned(), &network, &config, seed)?;
    host.coordinator.host(DEFAULT_PORT)?;

    let mut clients = Vec::with_capacity(client_count);
    for index in 0..client_count {
        let mut client = Participant::new(format!("client-{}", index + 1), &network, &config, seed)?;
        client.coordinator.connect("local", DEFAULT_PORT)?;
        clients.push(client);
    }

    // One frame carries exactly one tick at the initial speed.
    let rate = config.ticks_per_second(config.initial_speed).max(1);
    let frame = Duration::from_secs(1) / rate;

    // Handshakes complete within a couple of frames.
    for _ in 0..4 {
        host.update(frame);
        for client in &mut clients {
            client.update(frame);
        }
    }
    host.coordinator.start_game()?;

    println!("┌─ SESSION ───────────────────────────────────────────────────────┐");
    println!("│ Peers:              {}", host.coordinator.registry().len());
    println!("│ Target Ticks:       {}", target_ticks);
    println!("│ Seed:               {}", seed);
    println!("└──────────────────────────────────────────────────────────────────┘");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut frame_index = 0u64;
    let frame_limit = target_ticks.saturating_mul(4).max(100);
    while host.coordinator.current_tick() < target_ticks && frame_index < frame_limit {
        frame_index += 1;
        if frame_index % COMMAND_PERIOD == 0 {
            host.submit_random(&mut rng)?;
        }
        host.update(frame);
        for (index, client) in clients.iter_mut().enumerate() {
            if (frame_index + index as u64 + 1) % COMMAND_PERIOD == 0 {
                client.submit_random(&mut rng)?;
            }
            client.update(frame);
        }
    }

    // Let the clients drain the last announcements.
    for _ in 0..8 {
        host.update(Duration::ZERO);
        for client in &mut clients {
            client.update(frame);
        }
    }

    println!();
    println!("┌─ RESULT ────────────────────────────────────────────────────────┐");
    let reference = host.sim.compute_state_checksum();
    let mut desyncs = host.desyncs;
    println!(
        "│ {:<10} tick {:>6}  checksum {:#010x}  verified {}",
        host.name,
        host.coordinator.current_tick(),
        reference,
        host.verified
    );
    for client in &clients {
        desyncs += client.desyncs;
        println!(
            "│ {:<10} tick {:>6}  checksum {:#010x}  verified {}  id {}",
            client.name,
            client.coordinator.current_tick(),
            client.sim.compute_state_checksum(),
            client.verified,
            client.coordinator.local_id().0
        );
    }
    let stats = host.coordinator.clock_stats();
    println!("│ Dropped ticks:      {}", stats.dropped_ticks);
    println!("│ Desyncs:            {}", desyncs);
    println!("└──────────────────────────────────────────────────────────────────┘");

    let converged = clients.iter().all(|client| {
        client.coordinator.current_tick() != host.coordinator.current_tick()
            || client.sim.compute_state_checksum() == reference
    });
    if desyncs > 0 || !converged {
        return Err(format!("session diverged ({desyncs} desync reports)").into());
    }

    host.coordinator.disconnect();
    for client in &mut clients {
        client.coordinator.disconnect();
    }
    Ok(())
}
