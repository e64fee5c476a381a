//! Benchmarks for the engine hot paths.
//!
//! Map generation runs on every START_GAME; the tick runs once a second for
//! the whole game and is followed by a full-state broadcast.

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dice_dungeon::game::map::generate_map;
use dice_dungeon::network::NetworkMessage;
use dice_dungeon::{
    admit, apply, tick, Action, DeterministicRng, GameConfig, GameState, Player, PlayerId, StepContext,
};
use dice_dungeon::game::state::PlayerRole;

const T0: u64 = 1_700_000_000_000;

fn running_game(heroes: usize, config: &GameConfig) -> (GameState, DeterministicRng) {
    let mut rng = DeterministicRng::new(42);
    let mut state = GameState::new(config);
    let mut seats: Vec<Player> = (0..heroes)
        .map(|i| {
            let id = format!("hero-{}", i);
            Player::new(PlayerId::new(id.clone()), id, PlayerRole::Hero)
        })
        .collect();
    seats.push(Player::new(PlayerId::new("dm"), "DM", PlayerRole::Dm));

    for player in &seats {
        let mut ctx = StepContext::new(T0, &mut rng, config);
        state = admit(&state, player, &mut ctx);
    }
    let mut ctx = StepContext::new(T0, &mut rng, config);
    state = apply(&state, &Action::StartGame { player_id: PlayerId::new("hero-0") }, &mut ctx);
    (state, rng)
}

fn bench_map_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_map");
    for size in [8u32, 16] {
        let config = GameConfig { map_size: size, ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(size), &config, |b, config| {
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                let map = generate_map(black_box(config), &mut DeterministicRng::new(seed));
                black_box(map)
            });
        });
    }
    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let config = GameConfig { draft_enabled: false, ..Default::default() };
    let (state, mut rng) = running_game(4, &config);

    c.bench_function("tick_4_heroes", |b| {
        let mut now = T0;
        b.iter(|| {
            now += 1_000;
            let mut ctx = StepContext::new(now, &mut rng, &config);
            black_box(tick(black_box(&state), &mut ctx))
        });
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let config = GameConfig { draft_enabled: false, ..Default::default() };
    let (state, _) = running_game(4, &config);
    let message = NetworkMessage::SyncState(state);

    c.bench_function("sync_state_to_json", |b| {
        b.iter(|| black_box(message.to_json()))
    });
}

criterion_group!(benches, bench_map_generation, bench_tick, bench_snapshot_encode);
criterion_main!(benches);
