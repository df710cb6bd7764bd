//! Breadth-first pathfinding for NPCs chasing a target on a tile grid

use crate::content::Terrain;
use shared::Direction;
use std::collections::VecDeque;

/// First step of a shortest path from `from` to a tile next to `to`
///
/// Breadth-first over the four orthogonal neighbors. `passable` decides which
/// tiles may be entered; the goal tile itself is never entered since the
/// target stands on it. Returns `None` when already adjacent or when no path
/// exists.
pub fn next_step<F>(
    terrain: &Terrain,
    from: (u16, u16),
    to: (u16, u16),
    passable: F,
) -> Option<Direction>
where
    F: Fn(u16, u16) -> bool,
{
    if from == to || Direction::between(from, to).is_some() {
        return None;
    }

    let width = terrain.width() as usize;
    let index = |(x, y): (u16, u16)| y as usize * width + x as usize;

    // First direction taken from `from` to reach each visited tile
    let mut first: Vec<Option<Direction>> = vec![None; width * terrain.height() as usize];
    let mut visited = vec![false; first.len()];
    let mut queue = VecDeque::new();

    visited[index(from)] = true;
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        for direction in Direction::ALL {
            let Some(next) = terrain.step(current.0, current.1, direction) else {
                continue;
            };
            let initial = if current == from {
                Some(direction)
            } else {
                first[index(current)]
            };
            if next == to {
                return initial;
            }
            if visited[index(next)] || !passable(next.0, next.1) {
                continue;
            }
            visited[index(next)] = true;
            first[index(next)] = initial;
            queue.push_back(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Tile;

    fn walls(terrain: &mut Terrain, tiles: &[(u16, u16)]) {
        for &(x, y) in tiles {
            terrain.set_tile(x, y, Tile::Blocked);
        }
    }

    #[test]
    fn test_straight_line_step() {
        let terrain = Terrain::open(10, 10);
        let step = next_step(&terrain, (1, 1), (5, 1), |x, y| terrain.is_walkable(x, y));
        assert_eq!(step, Some(Direction::Right));
    }

    #[test]
    fn test_adjacent_target_needs_no_step() {
        let terrain = Terrain::open(5, 5);
        assert_eq!(next_step(&terrain, (2, 2), (2, 3), |_, _| true), None);
    }

    #[test]
    fn test_routes_around_wall() {
        let mut terrain = Terrain::open(7, 5);
        // Wall at x = 2 with the only gap at the bottom
        walls(&mut terrain, &[(2, 0), (2, 1), (2, 2), (2, 3)]);
        let step = next_step(&terrain, (1, 1), (5, 1), |x, y| terrain.is_walkable(x, y));
        assert_eq!(step, Some(Direction::Down));
    }

    #[test]
    fn test_unreachable_target() {
        let mut terrain = Terrain::open(7, 3);
        walls(&mut terrain, &[(3, 0), (3, 1), (3, 2)]);
        let step = next_step(&terrain, (0, 1), (6, 1), |x, y| terrain.is_walkable(x, y));
        assert_eq!(step, None);
    }

    #[test]
    fn test_occupied_tiles_are_avoided() {
        let terrain = Terrain::open(5, 3);
        // Something stands at (2, 1) between the NPC and its target
        let step = next_step(&terrain, (1, 1), (3, 1), |x, y| (x, y) != (2, 1));
        assert!(matches!(step, Some(Direction::Up) | Some(Direction::Down)));
    }
}
