use std::collections::HashSet;

use crate::grid::{CellCoord, GridState, Region};

// ============================================================================
// SELECTION CONTROLLER — pointer gesture state machine
// ============================================================================

/// Per-pointer-session drag state.
#[derive(Clone, Debug, Default)]
enum DragState {
    #[default]
    Idle,
    Dragging {
        /// Cell under the initial press; one corner of the live rectangle.
        anchor: CellCoord,
        /// Selection carried over from before the press (extend modifier).
        /// Empty for a plain press.
        base: HashSet<CellCoord>,
    },
}

/// Interprets press/move/release sequences into rectangular selections.
///
/// Mouse and single-touch input are handled identically — the caller maps
/// either to a cell coordinate first. Two-finger input is pinch-zoom
/// territory: while a pinch is active every selection update is suppressed,
/// and a pinch that degrades back to one finger does not resume the drag
/// from the old anchor.
#[derive(Default)]
pub struct SelectionController {
    state: DragState,
    pinch_active: bool,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Pointer press over `cell`. Pressing an already-owned cell is a no-op:
    /// no state transition, no selection change.
    ///
    /// Without the extend modifier the selection resets to just the anchor;
    /// with it, the existing selection is kept and grown from here.
    pub fn on_press(&mut self, grid: &mut GridState, cell: CellCoord, extend: bool) {
        if self.pinch_active {
            return;
        }
        if !grid.in_bounds(cell) || grid.is_owned(cell) {
            return;
        }
        let base = if extend {
            grid.selected.clone()
        } else {
            HashSet::new()
        };
        grid.selected = base.clone();
        grid.select_cell(cell);
        self.state = DragState::Dragging { anchor: cell, base };
    }

    /// Pointer moved to `cell` while the button/finger is down. Rebuilds the
    /// selection as the axis-aligned rectangle spanning anchor and `cell`,
    /// minus owned cells (which never block the rest of the rectangle).
    pub fn on_move(&mut self, grid: &mut GridState, cell: CellCoord) {
        if self.pinch_active {
            return;
        }
        if let DragState::Dragging { anchor, base } = &self.state {
            let rect = Region::from_corners(*anchor, cell);
            grid.select_rect(&base.clone(), rect);
        }
    }

    /// Button/finger released — back to Idle. The selection is retained
    /// until the user clears it or mints.
    pub fn on_release(&mut self) {
        self.state = DragState::Idle;
    }

    /// Pointer left the canvas mid-drag. Treated like a release.
    pub fn on_pointer_leave(&mut self) {
        self.state = DragState::Idle;
    }

    /// A second touch point appeared: pinch-zoom takes over. Any in-progress
    /// drag is abandoned (its selection so far is kept, the anchor is not).
    pub fn on_pinch_begin(&mut self) {
        self.pinch_active = true;
        self.state = DragState::Idle;
    }

    /// Back to at most one touch point. Selection only resumes with a fresh
    /// press.
    pub fn on_pinch_end(&mut self) {
        self.pinch_active = false;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OwnershipRecord;
    use chrono::Utc;
    use uuid::Uuid;

    fn grid_with_owned(rect: (u32, u32, u32, u32)) -> GridState {
        let mut grid = GridState::new(100, 100);
        grid.set_records(vec![OwnershipRecord {
            id: Uuid::new_v4(),
            region: Region {
                start_x: rect.0,
                start_y: rect.1,
                end_x: rect.2,
                end_y: rect.3,
            },
            owner: "wallet".into(),
            image_url: String::new(),
            metadata_url: String::new(),
            tx_signature: String::new(),
            external_link: None,
            created_at: Utc::now(),
        }]);
        grid
    }

    #[test]
    fn press_drag_release_selects_rectangle() {
        let mut grid = GridState::new(100, 100);
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(2, 3), false);
        ctl.on_move(&mut grid, CellCoord::new(3, 4));
        ctl.on_release();

        let expected: HashSet<_> = [(2, 3), (2, 4), (3, 3), (3, 4)]
            .iter()
            .map(|&(x, y)| CellCoord::new(x, y))
            .collect();
        assert_eq!(grid.selected, expected);
        // Selection survives the release.
        assert!(!ctl.is_dragging());
        assert_eq!(grid.selected, expected);
    }

    #[test]
    fn drag_rectangle_excludes_owned_cells() {
        let mut grid = grid_with_owned((1, 1, 1, 1));
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(0, 0), false);
        ctl.on_move(&mut grid, CellCoord::new(2, 2));

        assert_eq!(grid.selected.len(), 8); // 9 cells minus the owned one
        assert!(!grid.selected.contains(&CellCoord::new(1, 1)));
    }

    #[test]
    fn press_on_owned_cell_is_noop() {
        let mut grid = grid_with_owned((5, 5, 6, 6));
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(5, 5), false);
        assert!(!ctl.is_dragging());
        assert!(grid.selected.is_empty());

        // A move afterwards must not start selecting either.
        ctl.on_move(&mut grid, CellCoord::new(8, 8));
        assert!(grid.selected.is_empty());
    }

    #[test]
    fn plain_press_resets_previous_selection() {
        let mut grid = GridState::new(100, 100);
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(0, 0), false);
        ctl.on_move(&mut grid, CellCoord::new(1, 1));
        ctl.on_release();
        assert_eq!(grid.selected.len(), 4);

        ctl.on_press(&mut grid, CellCoord::new(10, 10), false);
        assert_eq!(grid.selected.len(), 1);
        assert!(grid.selected.contains(&CellCoord::new(10, 10)));
    }

    #[test]
    fn extend_press_keeps_previous_selection() {
        let mut grid = GridState::new(100, 100);
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(0, 0), false);
        ctl.on_release();
        ctl.on_press(&mut grid, CellCoord::new(5, 5), true);
        ctl.on_move(&mut grid, CellCoord::new(6, 5));
        ctl.on_release();

        assert_eq!(grid.selected.len(), 3); // (0,0) + (5,5) + (6,5)
        assert!(grid.selected.contains(&CellCoord::new(0, 0)));
    }

    #[test]
    fn shrinking_drag_drops_cells_outside_rectangle() {
        let mut grid = GridState::new(100, 100);
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(0, 0), false);
        ctl.on_move(&mut grid, CellCoord::new(4, 4));
        assert_eq!(grid.selected.len(), 25);
        ctl.on_move(&mut grid, CellCoord::new(1, 1));
        assert_eq!(grid.selected.len(), 4);
    }

    #[test]
    fn pinch_suppresses_selection_and_does_not_resume() {
        let mut grid = GridState::new(100, 100);
        let mut ctl = SelectionController::new();

        ctl.on_press(&mut grid, CellCoord::new(0, 0), false);
        ctl.on_pinch_begin();
        ctl.on_move(&mut grid, CellCoord::new(9, 9));
        assert_eq!(grid.selected.len(), 1); // unchanged since the press

        // Degrades back to one finger: old anchor is gone.
        ctl.on_pinch_end();
        ctl.on_move(&mut grid, CellCoord::new(9, 9));
        assert_eq!(grid.selected.len(), 1);
        assert!(!ctl.is_dragging());

        // Presses during an active pinch are ignored too.
        ctl.on_pinch_begin();
        ctl.on_press(&mut grid, CellCoord::new(3, 3), false);
        assert!(!ctl.is_dragging());
    }
}
