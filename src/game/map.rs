//! Dungeon Map Generation
//!
//! Recursive-backtracker maze over a square grid, braided with extra edges,
//! then seeded with obstacles, the red key and the red door. The door is
//! never placed on the shortest path from Start to the key.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::rng::DeterministicRng;
use crate::game::catalog::{self, RED_DOOR, RED_KEY_ID};
use crate::game::config::GameConfig;
use crate::game::state::{Direction, Room, RoomId, RoomObstacle};

/// Rejection-sampling budget for the Exit room.
const EXIT_ATTEMPTS: u32 = 100;

/// Output of [`generate_map`].
#[derive(Clone, Debug)]
pub struct GeneratedMap {
    /// Every room, keyed by id.
    pub rooms: BTreeMap<RoomId, Room>,
    /// Spawn room.
    pub start: RoomId,
    /// Escape room.
    pub exit: RoomId,
    /// Room holding the red key.
    pub key_room: RoomId,
    /// Room holding the red door (None only on degenerate grids).
    pub door_room: Option<RoomId>,
}

/// Build a fresh dungeon.
pub fn generate_map(config: &GameConfig, rng: &mut DeterministicRng) -> GeneratedMap {
    let size = config.effective_map_size() as i32;

    let mut rooms: BTreeMap<RoomId, Room> = BTreeMap::new();
    for x in 0..size {
        for y in 0..size {
            let id = RoomId::new(x, y);
            rooms.insert(id, Room::new(id));
        }
    }

    let start = RoomId::new(rng.next_int(size as u32) as i32, rng.next_int(size as u32) as i32);
    carve_maze(&mut rooms, start, size, rng);

    if let Some(room) = rooms.get_mut(&start) {
        room.is_start = true;
    }

    let exit = pick_exit(start, size, config.exit_min_distance, rng);
    if let Some(room) = rooms.get_mut(&exit) {
        room.is_exit = true;
    }

    braid(&mut rooms, size, rng);
    seed_obstacles(&mut rooms, config.obstacle_seed_percent, rng);

    let all_ids: Vec<RoomId> = rooms.keys().copied().collect();

    let key_candidates: Vec<RoomId> = all_ids.iter().copied().filter(|id| *id != start && *id != exit).collect();
    let key_room = rng.choose(&key_candidates).copied().unwrap_or(exit);
    if let Some(room) = rooms.get_mut(&key_room) {
        room.items.push(RED_KEY_ID.to_string());
    }

    let key_path: BTreeSet<RoomId> = find_path(&rooms, start, key_room)
        .unwrap_or_default()
        .into_iter()
        .collect();
    let door_candidates: Vec<RoomId> = all_ids.iter().copied().filter(|id| !key_path.contains(id)).collect();
    let door_room = rng.choose(&door_candidates).copied();
    if let Some(room) = door_room.and_then(|id| rooms.get_mut(&id)) {
        room.active_obstacles.push(RoomObstacle::new("obs-red-door", RED_DOOR.instantiate("card-red-door")));
    }

    GeneratedMap { rooms, start, exit, key_room, door_room }
}

fn in_bounds(id: RoomId, size: i32) -> bool {
    id.x >= 0 && id.x < size && id.y >= 0 && id.y < size
}

fn link(rooms: &mut BTreeMap<RoomId, Room>, a: RoomId, b: RoomId) {
    if let Some(room) = rooms.get_mut(&a) {
        room.connections.push(b);
    }
    if let Some(room) = rooms.get_mut(&b) {
        room.connections.push(a);
    }
}

/// Depth-first carve; leaves a spanning tree over the whole grid.
fn carve_maze(rooms: &mut BTreeMap<RoomId, Room>, start: RoomId, size: i32, rng: &mut DeterministicRng) {
    let mut visited = BTreeSet::new();
    let mut stack = vec![start];
    visited.insert(start);

    while let Some(&current) = stack.last() {
        let unvisited: Vec<RoomId> = Direction::ALL
            .iter()
            .map(|d| current.neighbor(*d))
            .filter(|n| in_bounds(*n, size) && !visited.contains(n))
            .collect();

        match rng.choose(&unvisited).copied() {
            Some(next) => {
                link(rooms, current, next);
                visited.insert(next);
                stack.push(next);
            }
            None => {
                stack.pop();
            }
        }
    }
}

/// Random far-away room, or the half-grid offset of Start when sampling fails.
fn pick_exit(start: RoomId, size: i32, min_distance: u32, rng: &mut DeterministicRng) -> RoomId {
    for _ in 0..EXIT_ATTEMPTS {
        let candidate = RoomId::new(rng.next_int(size as u32) as i32, rng.next_int(size as u32) as i32);
        if candidate.manhattan(start) > min_distance {
            return candidate;
        }
    }

    let half = (size / 2).max(1);
    RoomId::new((start.x + half) % size, (start.y + half) % size)
}

/// Add ~1.5 x size extra east/south edges to break up dead ends.
fn braid(rooms: &mut BTreeMap<RoomId, Room>, size: i32, rng: &mut DeterministicRng) {
    let passes = (size as u32 * 3) / 2;
    for _ in 0..passes {
        let id = RoomId::new(rng.next_int(size as u32) as i32, rng.next_int(size as u32) as i32);
        for direction in [Direction::E, Direction::S] {
            let neighbor = id.neighbor(direction);
            if !in_bounds(neighbor, size) {
                continue;
            }
            let already = rooms.get(&id).map(|r| r.connects_to(neighbor)).unwrap_or(true);
            if !already {
                link(rooms, id, neighbor);
                break;
            }
        }
    }
}

fn seed_obstacles(rooms: &mut BTreeMap<RoomId, Room>, percent: u32, rng: &mut DeterministicRng) {
    for room in rooms.values_mut() {
        if room.is_start || !rng.chance(percent) {
            continue;
        }
        let obstacle_id = format!("obs-init-{}", room.id);
        if let Some(card) = catalog::draw_seed_card(rng, format!("card-init-{}", room.id)) {
            room.active_obstacles.push(RoomObstacle::new(obstacle_id, card));
        }
    }
}

// =============================================================================
// GRAPH QUERIES
// =============================================================================

/// Shortest path by BFS over `connections`, endpoints included.
pub fn find_path<R: AsRef<Room>>(rooms: &BTreeMap<RoomId, R>, from: RoomId, to: RoomId) -> Option<Vec<RoomId>> {
    let mut parents: BTreeMap<RoomId, RoomId> = BTreeMap::new();
    let mut queue = VecDeque::from([from]);
    let mut seen = BTreeSet::from([from]);

    while let Some(current) = queue.pop_front() {
        if current == to {
            let mut path = vec![current];
            let mut cursor = current;
            while let Some(&parent) = parents.get(&cursor) {
                path.push(parent);
                cursor = parent;
            }
            path.reverse();
            return Some(path);
        }
        let Some(room) = rooms.get(&current) else { continue };
        for &next in &room.as_ref().connections {
            if seen.insert(next) {
                parents.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    None
}

/// Every room reachable from `from`.
pub fn reachable_from<R: AsRef<Room>>(rooms: &BTreeMap<RoomId, R>, from: RoomId) -> BTreeSet<RoomId> {
    let mut seen = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if let Some(room) = rooms.get(&current) {
            for &next in &room.as_ref().connections {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }
    seen
}

// =============================================================================
// TESTS
// =============================================================================
