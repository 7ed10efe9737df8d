//! Walkability grid at robot-diameter resolution and A* over it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::arena::Arena;
use crate::constants::COMMAND_TOLERANCE;
use crate::geometry::{normalize_angle, Point};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub col: i32,
    pub row: i32,
}

impl Cell {
    pub fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    pub fn manhattan(self, other: Cell) -> i32 {
        (self.col - other.col).abs() + (self.row - other.row).abs()
    }

    pub fn neighbors(self) -> [Cell; 4] {
        [
            Cell::new(self.col, self.row - 1),
            Cell::new(self.col + 1, self.row),
            Cell::new(self.col, self.row + 1),
            Cell::new(self.col - 1, self.row),
        ]
    }
}

#[derive(Clone, Debug, Default)]
pub struct NavGrid {
    pub cell_size: f64,
    pub cols: i32,
    pub rows: i32,
    walkable: Vec<bool>,
}

impl NavGrid {
    /// A cell is walkable iff a robot centred on its midpoint is a valid
    /// position in `arena`.
    pub fn build(arena: &Arena, robot_radius: f64) -> Self {
        let cell_size = robot_radius * 2.0;
        let cols = (arena.width / cell_size).floor().max(0.0) as i32;
        let rows = (arena.height / cell_size).floor().max(0.0) as i32;
        let mut walkable = Vec::with_capacity((cols as usize).saturating_mul(rows as usize));
        for row in 0..rows {
            for col in 0..cols {
                let center = Point::new(
                    (col as f64 + 0.5) * cell_size,
                    (row as f64 + 0.5) * cell_size,
                );
                walkable.push(arena.is_position_valid(center, robot_radius));
            }
        }
        Self {
            cell_size,
            cols,
            rows,
            walkable,
        }
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.col >= 0 && cell.row >= 0 && cell.col < self.cols && cell.row < self.rows
    }

    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.walkable[(cell.row * self.cols + cell.col) as usize]
    }

    pub fn set_walkable(&mut self, cell: Cell, walkable: bool) {
        if self.in_bounds(cell) {
            let idx = (cell.row * self.cols + cell.col) as usize;
            self.walkable[idx] = walkable;
        }
    }

    pub fn cell_of(&self, p: Point) -> Option<Cell> {
        if self.cell_size <= 0.0 {
            return None;
        }
        let cell = Cell::new(
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        );
        self.in_bounds(cell).then_some(cell)
    }

    pub fn center_of(&self, cell: Cell) -> Point {
        Point::new(
            (cell.col as f64 + 0.5) * self.cell_size,
            (cell.row as f64 + 0.5) * self.cell_size,
        )
    }

    /// A* with a Manhattan heuristic over 4-connected cells. The start cell
    /// is accepted even when unwalkable (a robot parked against an obstacle
    /// still needs to leave); the goal must be walkable. `None` means the
    /// destination is unreachable.
    pub fn find_cell_path(&self, start: Cell, goal: Cell) -> Option<Vec<Cell>> {
        if !self.in_bounds(start) || !self.is_walkable(goal) {
            return None;
        }
        if start == goal {
            return Some(vec![start]);
        }

        let mut open = BinaryHeap::new();
        let mut came_from: HashMap<Cell, Cell> = HashMap::new();
        let mut g_score: HashMap<Cell, i32> = HashMap::new();
        let mut sequence = 0u64;

        g_score.insert(start, 0);
        open.push(OpenNode {
            f: start.manhattan(goal),
            h: start.manhattan(goal),
            sequence,
            cell: start,
        });

        while let Some(node) = open.pop() {
            if node.cell == goal {
                return Some(reconstruct(&came_from, goal));
            }
            let current_g = g_score.get(&node.cell).copied().unwrap_or(i32::MAX);
            if node.f - node.h > current_g {
                continue;
            }
            for next in node.cell.neighbors() {
                if !self.is_walkable(next) {
                    continue;
                }
                let tentative = current_g + 1;
                if tentative < g_score.get(&next).copied().unwrap_or(i32::MAX) {
                    came_from.insert(next, node.cell);
                    g_score.insert(next, tentative);
                    sequence += 1;
                    let h = next.manhattan(goal);
                    open.push(OpenNode {
                        f: tentative + h,
                        h,
                        sequence,
                        cell: next,
                    });
                }
            }
        }
        None
    }

    /// World-space waypoints from `start` to `goal`, excluding the start cell
    /// and ending exactly at `goal`.
    pub fn find_path(&self, start: Point, goal: Point) -> Option<Vec<Point>> {
        let start_cell = self.cell_of(start)?;
        let goal_cell = self.cell_of(goal)?;
        let cells = self.find_cell_path(start_cell, goal_cell)?;
        let mut waypoints: Vec<Point> = cells
            .iter()
            .skip(1)
            .map(|cell| self.center_of(*cell))
            .collect();
        match waypoints.last_mut() {
            Some(last) => *last = goal,
            None => waypoints.push(goal),
        }
        Some(waypoints)
    }
}

fn reconstruct(came_from: &HashMap<Cell, Cell>, goal: Cell) -> Vec<Cell> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(prev) = came_from.get(&current) {
        path.push(*prev);
        current = *prev;
    }
    path.reverse();
    path
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OpenNode {
    f: i32,
    h: i32,
    sequence: u64,
    cell: Cell,
}

impl Ord for OpenNode {
    // BinaryHeap is a max-heap; invert so the lowest f (then h, then oldest
    // insertion) pops first. The insertion tie-break keeps paths stable.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathStep {
    Rotate(f64),
    Move(f64),
}

/// Turns a waypoint list into alternating rotate/move steps. Consecutive
/// collinear legs are merged into one move so the robot does not stop to
/// re-aim on every grid cell.
pub fn plan_path_steps(start: Point, heading_deg: f64, waypoints: &[Point]) -> Vec<PathStep> {
    let mut legs: Vec<(f64, f64)> = Vec::new();
    let mut from = start;
    for waypoint in waypoints {
        let dx = waypoint.x - from.x;
        let dy = waypoint.y - from.y;
        let length = dx.hypot(dy);
        if length < COMMAND_TOLERANCE {
            continue;
        }
        let leg_heading = dy.atan2(dx).to_degrees();
        match legs.last_mut() {
            Some((heading, distance)) if normalize_angle(leg_heading - *heading).abs() < 0.5 => {
                *distance += length;
            }
            _ => legs.push((leg_heading, length)),
        }
        from = *waypoint;
    }

    let mut steps = Vec::with_capacity(legs.len() * 2);
    let mut heading = heading_deg;
    for (leg_heading, distance) in legs {
        let turn = normalize_angle(leg_heading - heading);
        if turn.abs() >= COMMAND_TOLERANCE {
            steps.push(PathStep::Rotate(turn));
        }
        steps.push(PathStep::Move(distance));
        heading = leg_heading;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Obstacle;
    use crate::geometry::Rect;

    fn open_grid() -> NavGrid {
        NavGrid::build(&Arena::new(400.0, 400.0), 20.0)
    }

    #[test]
    fn grid_resolution_is_robot_diameter() {
        let grid = open_grid();
        assert_eq!(grid.cols, 10);
        assert_eq!(grid.rows, 10);
        assert!(grid.is_walkable(Cell::new(0, 0)));
        assert!(grid.is_walkable(Cell::new(9, 9)));
    }

    #[test]
    fn obstacle_marks_cells_unwalkable() {
        let mut arena = Arena::new(400.0, 400.0);
        arena.obstacles.push(Obstacle {
            id: "obstacle_1".to_string(),
            rect: Rect::new(160.0, 160.0, 80.0, 80.0),
        });
        let grid = NavGrid::build(&arena, 20.0);
        assert!(!grid.is_walkable(Cell::new(4, 4)));
        assert!(!grid.is_walkable(Cell::new(5, 5)));
        assert!(grid.is_walkable(Cell::new(1, 1)));
    }

    #[test]
    fn open_grid_path_is_four_adjacent_and_walkable() {
        let grid = open_grid();
        let path = grid
            .find_cell_path(Cell::new(0, 0), Cell::new(7, 5))
            .expect("open grid has a path");
        assert_eq!(path.first(), Some(&Cell::new(0, 0)));
        assert_eq!(path.last(), Some(&Cell::new(7, 5)));
        assert_eq!(path.len(), 13);
        for pair in path.windows(2) {
            assert_eq!(pair[0].manhattan(pair[1]), 1);
            assert!(grid.is_walkable(pair[1]));
        }
    }

    #[test]
    fn walled_off_goal_has_no_path() {
        let mut grid = open_grid();
        for row in 0..grid.rows {
            grid.set_walkable(Cell::new(5, row), false);
        }
        assert!(grid.find_cell_path(Cell::new(0, 0), Cell::new(9, 9)).is_none());
        assert!(grid
            .find_path(Point::new(20.0, 20.0), Point::new(380.0, 380.0))
            .is_none());
    }

    #[test]
    fn unwalkable_goal_has_no_path() {
        let mut grid = open_grid();
        grid.set_walkable(Cell::new(3, 3), false);
        assert!(grid.find_cell_path(Cell::new(0, 0), Cell::new(3, 3)).is_none());
    }

    #[test]
    fn path_ends_at_requested_goal() {
        let grid = open_grid();
        let goal = Point::new(333.0, 71.0);
        let path = grid
            .find_path(Point::new(30.0, 30.0), goal)
            .expect("path exists");
        assert_eq!(path.last().copied(), Some(goal));
    }

    #[test]
    fn collinear_waypoints_coalesce_into_one_move() {
        let waypoints = [
            Point::new(40.0, 0.0),
            Point::new(80.0, 0.0),
            Point::new(120.0, 0.0),
            Point::new(120.0, 40.0),
            Point::new(120.0, 80.0),
        ];
        let steps = plan_path_steps(Point::new(0.0, 0.0), 0.0, &waypoints);
        assert_eq!(
            steps,
            vec![
                PathStep::Move(120.0),
                PathStep::Rotate(90.0),
                PathStep::Move(80.0),
            ]
        );
    }
}
