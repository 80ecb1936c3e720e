use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CELL COORDINATES
// ============================================================================

/// One addressable unit of the grid, identified by integer (x, y).
///
/// The textual wire form `"{x},{y}"` is used as the map/set key in every
/// persisted payload; [`CellCoord::key`] and [`CellCoord::parse_key`] are the
/// only places that form is produced or consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Wire key, e.g. `"13,7"`.
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.y)
    }

    /// Parse a wire key back into a coordinate. Returns `None` for anything
    /// that is not exactly two comma-separated non-negative integers.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (x, y) = key.split_once(',')?;
        Some(Self {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        })
    }
}

// ============================================================================
// REGIONS — axis-aligned cell rectangles
// ============================================================================

/// Inclusive axis-aligned rectangle of cells, `start <= end` on both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl Region {
    /// Build a normalized region from any two corner cells.
    pub fn from_corners(a: CellCoord, b: CellCoord) -> Self {
        Self {
            start_x: a.x.min(b.x),
            start_y: a.y.min(b.y),
            end_x: a.x.max(b.x),
            end_y: a.y.max(b.y),
        }
    }

    /// Tight bounding region of a non-empty cell set.
    pub fn bounding(cells: &HashSet<CellCoord>) -> Option<Self> {
        let mut it = cells.iter();
        let first = *it.next()?;
        let mut r = Region::from_corners(first, first);
        for c in it {
            r.start_x = r.start_x.min(c.x);
            r.start_y = r.start_y.min(c.y);
            r.end_x = r.end_x.max(c.x);
            r.end_y = r.end_y.max(c.y);
        }
        Some(r)
    }

    pub fn width(&self) -> u32 {
        self.end_x - self.start_x + 1
    }

    pub fn height(&self) -> u32 {
        self.end_y - self.start_y + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn contains(&self, c: CellCoord) -> bool {
        c.x >= self.start_x && c.x <= self.end_x && c.y >= self.start_y && c.y <= self.end_y
    }

    /// Range-overlap predicate: two rectangles overlap iff neither lies
    /// entirely beside or entirely above/below the other. The record store
    /// enforces this at write time; the client uses the same predicate for
    /// pre-flight checks.
    pub fn overlaps(&self, other: &Region) -> bool {
        !(self.start_x > other.end_x
            || self.end_x < other.start_x
            || self.start_y > other.end_y
            || self.end_y < other.start_y)
    }

    /// Iterate every cell in the region, row-major.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.start_y..=self.end_y)
            .flat_map(move |y| (self.start_x..=self.end_x).map(move |x| CellCoord::new(x, y)))
    }
}

// ============================================================================
// OWNERSHIP RECORDS
// ============================================================================

/// A persisted rectangle-to-owner mapping backed by an on-chain asset.
/// Mirrored locally for rendering; the record store is authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub region: Region,
    /// Owning wallet address (base58).
    pub owner: String,
    /// Permanent URL of the uploaded ad image.
    pub image_url: String,
    /// Permanent URL of the metadata artifact.
    pub metadata_url: String,
    /// Chain transaction signature of the mint.
    pub tx_signature: String,
    /// Optional click-through link chosen by the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Merge authoritative records from the store with optimistic local records
/// (minted this session but possibly not yet visible server-side). Resolution
/// is strictly by record id — an authoritative copy always wins over the
/// optimistic one, and positional order is never significant.
pub fn merge_records(
    authoritative: Vec<OwnershipRecord>,
    optimistic: &[OwnershipRecord],
) -> Vec<OwnershipRecord> {
    let known: HashSet<Uuid> = authoritative.iter().map(|r| r.id).collect();
    let mut merged = authoritative;
    for rec in optimistic {
        if !known.contains(&rec.id) {
            merged.push(rec.clone());
        }
    }
    merged
}

// ============================================================================
// GRID STATE
// ============================================================================

/// Canonical client-side grid occupancy: which cells are owned (derived from
/// the mirrored ownership records, read-only here), which are selected
/// in-progress, and which single cell the pointer hovers.
///
/// Invariant: `selected` and `owned` are disjoint. All mutation paths that
/// add to `selected` go through [`GridState::select_rect`] /
/// [`GridState::select_cell`], which filter owned cells.
pub struct GridState {
    pub width: u32,
    pub height: u32,
    pub selected: HashSet<CellCoord>,
    pub hovered: Option<CellCoord>,
    /// Mirrored ownership records, authoritative + optimistic, merged by id.
    records: Vec<OwnershipRecord>,
    /// Every cell covered by some record. Rebuilt when records change.
    owned: HashSet<CellCoord>,
}

impl GridState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            selected: HashSet::new(),
            hovered: None,
            records: Vec::new(),
            owned: HashSet::new(),
        }
    }

    pub fn in_bounds(&self, c: CellCoord) -> bool {
        c.x < self.width && c.y < self.height
    }

    pub fn is_owned(&self, c: CellCoord) -> bool {
        self.owned.contains(&c)
    }

    pub fn records(&self) -> &[OwnershipRecord] {
        &self.records
    }

    /// The record covering `c`, if any. Records never overlap, so the first
    /// match is the only match.
    pub fn record_at(&self, c: CellCoord) -> Option<&OwnershipRecord> {
        self.records.iter().find(|r| r.region.contains(c))
    }

    /// Replace the mirrored record set (e.g. after a store reload) and
    /// rebuild the owned-cell index. Any selected cell that became owned is
    /// dropped to preserve the disjointness invariant.
    pub fn set_records(&mut self, records: Vec<OwnershipRecord>) {
        self.records = records;
        self.owned.clear();
        for rec in &self.records {
            self.owned.extend(rec.region.cells());
        }
        self.selected.retain(|c| !self.owned.contains(c));
    }

    /// Insert one record (realtime notification or optimistic local mint).
    /// Ignored if a record with the same id is already mirrored.
    pub fn add_record(&mut self, record: OwnershipRecord) {
        if self.records.iter().any(|r| r.id == record.id) {
            return;
        }
        self.owned.extend(record.region.cells());
        self.selected.retain(|c| !self.owned.contains(c));
        self.records.push(record);
    }

    /// Reconcile with a fresh authoritative record set, keeping optimistic
    /// local records the server does not know yet.
    pub fn reconcile(&mut self, authoritative: Vec<OwnershipRecord>) {
        let merged = merge_records(authoritative, &self.records);
        self.set_records(merged);
    }

    /// Select exactly one non-owned in-bounds cell (plus whatever `base`
    /// carries over from an extend-modifier press).
    pub fn select_cell(&mut self, c: CellCoord) {
        if self.in_bounds(c) && !self.is_owned(c) {
            self.selected.insert(c);
        }
    }

    /// Rebuild the selection as `base ∪ (rect \ owned)`. Owned cells inside
    /// the rectangle are silently skipped — they never block the rest.
    pub fn select_rect(&mut self, base: &HashSet<CellCoord>, rect: Region) {
        self.selected = base.clone();
        for c in rect.cells() {
            if self.in_bounds(c) && !self.is_owned(c) {
                self.selected.insert(c);
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Bounding region of the current selection (what actually gets minted).
    pub fn selection_region(&self) -> Option<Region> {
        Region::bounding(&self.selected)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u128, rect: (u32, u32, u32, u32)) -> OwnershipRecord {
        OwnershipRecord {
            id: Uuid::from_u128(id),
            region: Region {
                start_x: rect.0,
                start_y: rect.1,
                end_x: rect.2,
                end_y: rect.3,
            },
            owner: "8fGk3W1zQ9yB".into(),
            image_url: "https://perma.example/img".into(),
            metadata_url: "https://perma.example/meta".into(),
            tx_signature: "sig".into(),
            external_link: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cell_key_round_trip() {
        let c = CellCoord::new(13, 7);
        assert_eq!(c.key(), "13,7");
        assert_eq!(CellCoord::parse_key("13,7"), Some(c));
        assert_eq!(CellCoord::parse_key("13"), None);
        assert_eq!(CellCoord::parse_key("a,7"), None);
    }

    #[test]
    fn overlap_predicate() {
        let a = Region { start_x: 0, start_y: 0, end_x: 4, end_y: 4 };
        let beside = Region { start_x: 5, start_y: 0, end_x: 9, end_y: 4 };
        let below = Region { start_x: 0, start_y: 5, end_x: 4, end_y: 9 };
        let inside = Region { start_x: 1, start_y: 1, end_x: 2, end_y: 3 };
        let corner = Region { start_x: 4, start_y: 4, end_x: 8, end_y: 8 };

        assert!(!a.overlaps(&beside));
        assert!(!beside.overlaps(&a));
        assert!(!a.overlaps(&below));
        // Containment and single-cell corner contact both count as overlap.
        assert!(a.overlaps(&inside));
        assert!(inside.overlaps(&a));
        assert!(a.overlaps(&corner));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn region_geometry() {
        let r = Region::from_corners(CellCoord::new(3, 4), CellCoord::new(2, 3));
        assert_eq!(r, Region { start_x: 2, start_y: 3, end_x: 3, end_y: 4 });
        assert_eq!(r.cell_count(), 4);
        let cells: Vec<_> = r.cells().collect();
        assert_eq!(cells.len(), 4);
        assert!(r.contains(CellCoord::new(3, 3)));
        assert!(!r.contains(CellCoord::new(4, 3)));
    }

    #[test]
    fn select_rect_excludes_owned() {
        let mut grid = GridState::new(100, 100);
        grid.set_records(vec![record(1, (2, 2, 3, 3))]);

        grid.select_rect(&HashSet::new(), Region::from_corners(
            CellCoord::new(1, 1),
            CellCoord::new(4, 4),
        ));
        // 16 cells in the rectangle, 4 of them owned.
        assert_eq!(grid.selected.len(), 12);
        assert!(!grid.selected.contains(&CellCoord::new(2, 2)));
        assert!(grid.selected.contains(&CellCoord::new(1, 1)));
        assert!(grid.selected.iter().all(|c| !grid.is_owned(*c)));
    }

    #[test]
    fn select_rect_clips_to_bounds() {
        let mut grid = GridState::new(5, 5);
        grid.select_rect(&HashSet::new(), Region::from_corners(
            CellCoord::new(3, 3),
            CellCoord::new(9, 9),
        ));
        assert_eq!(grid.selected.len(), 4); // (3..=4) × (3..=4)
    }

    #[test]
    fn new_record_evicts_selection() {
        let mut grid = GridState::new(100, 100);
        grid.select_rect(&HashSet::new(), Region::from_corners(
            CellCoord::new(0, 0),
            CellCoord::new(1, 1),
        ));
        assert_eq!(grid.selected.len(), 4);
        grid.add_record(record(7, (1, 1, 2, 2)));
        assert!(!grid.selected.contains(&CellCoord::new(1, 1)));
        assert_eq!(grid.selected.len(), 3);
    }

    #[test]
    fn merge_resolves_by_id_not_position() {
        let auth = vec![record(1, (0, 0, 0, 0)), record(2, (1, 0, 1, 0))];
        let optimistic = vec![record(2, (9, 9, 9, 9)), record(3, (2, 0, 2, 0))];
        let merged = merge_records(auth, &optimistic);
        assert_eq!(merged.len(), 3);
        // The authoritative copy of id 2 wins.
        let r2 = merged.iter().find(|r| r.id == Uuid::from_u128(2)).unwrap();
        assert_eq!(r2.region.start_x, 1);
    }

    #[test]
    fn selection_region_is_bounding_box() {
        let mut grid = GridState::new(100, 100);
        for (x, y) in [(2, 3), (2, 4), (3, 3), (3, 4)] {
            grid.select_cell(CellCoord::new(x, y));
        }
        let region = grid.selection_region().unwrap();
        assert_eq!(region, Region { start_x: 2, start_y: 3, end_x: 3, end_y: 4 });
    }

    #[test]
    fn record_wire_format_uses_camel_case_bounds() {
        let rec = record(5, (2, 3, 3, 4));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["startX"], 2);
        assert_eq!(json["startY"], 3);
        assert_eq!(json["endX"], 3);
        assert_eq!(json["endY"], 4);
        let back: OwnershipRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }
}
