//! Rectangular arrays of wells.
//!
//! A [`Plate`] is a grid of [`Container`] wells (e.g. a 96-well microplate),
//! each capped at the same per-well maximum volume. Region selection is
//! separated from arithmetic: a [`WellSelector`] names a region and the pure
//! [`resolve`] function turns it into concrete coordinates, so every fan-out
//! operation is a plain loop over resolved wells.
//!
//! Plate operations share the container value semantics: each returns fresh
//! plates/containers and either applies to every selected well or fails
//! without touching anything.

use std::collections::BTreeSet;

use crate::container::{Container, RemoveTarget};
use crate::substance::Substance;
use crate::{Result, UnitConfig, UsageError};

/// A region of a plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WellSelector {
    /// Every well.
    All,
    /// A single well by row and column label.
    Well(String, String),
    /// A whole row.
    Row(String),
    /// A whole column.
    Column(String),
    /// An inclusive rectangle between two wells.
    Span {
        from: (String, String),
        to: (String, String),
    },
}

impl WellSelector {
    /// Convenience constructor for a single well.
    pub fn well(row: &str, column: &str) -> WellSelector {
        WellSelector::Well(row.to_string(), column.to_string())
    }
}

fn label_index(labels: &[String], label: &str, axis: &'static str) -> Result<usize> {
    labels
        .iter()
        .position(|candidate| candidate == label)
        .ok_or_else(|| {
            UsageError::UnknownLabel {
                axis,
                label: label.to_string(),
            }
            .into()
        })
}

/// Resolves a selector against row and column labels into row-major
/// `(row, column)` coordinates.
pub fn resolve(
    selector: &WellSelector,
    row_labels: &[String],
    column_labels: &[String],
) -> Result<Vec<(usize, usize)>> {
    match selector {
        WellSelector::All => Ok((0..row_labels.len())
            .flat_map(|r| (0..column_labels.len()).map(move |c| (r, c)))
            .collect()),
        WellSelector::Well(row, column) => {
            let r = label_index(row_labels, row, "row")?;
            let c = label_index(column_labels, column, "column")?;
            Ok(vec![(r, c)])
        }
        WellSelector::Row(row) => {
            let r = label_index(row_labels, row, "row")?;
            Ok((0..column_labels.len()).map(|c| (r, c)).collect())
        }
        WellSelector::Column(column) => {
            let c = label_index(column_labels, column, "column")?;
            Ok((0..row_labels.len()).map(|r| (r, c)).collect())
        }
        WellSelector::Span { from, to } => {
            let r0 = label_index(row_labels, &from.0, "row")?;
            let c0 = label_index(column_labels, &from.1, "column")?;
            let r1 = label_index(row_labels, &to.0, "row")?;
            let c1 = label_index(column_labels, &to.1, "column")?;
            if r1 < r0 || c1 < c0 {
                return Err(
                    UsageError::PlateGeometry("span endpoints are reversed".to_string()).into(),
                );
            }
            Ok((r0..=r1)
                .flat_map(|r| (c0..=c1).map(move |c| (r, c)))
                .collect())
        }
    }
}

/// `(rows, columns)` shape of the region a selector names.
fn selection_shape(
    selector: &WellSelector,
    row_labels: &[String],
    column_labels: &[String],
) -> Result<(usize, usize)> {
    match selector {
        WellSelector::All => Ok((row_labels.len(), column_labels.len())),
        WellSelector::Well(row, column) => {
            label_index(row_labels, row, "row")?;
            label_index(column_labels, column, "column")?;
            Ok((1, 1))
        }
        WellSelector::Row(row) => {
            label_index(row_labels, row, "row")?;
            Ok((1, column_labels.len()))
        }
        WellSelector::Column(column) => {
            label_index(column_labels, column, "column")?;
            Ok((row_labels.len(), 1))
        }
        WellSelector::Span { from, to } => {
            let r0 = label_index(row_labels, &from.0, "row")?;
            let c0 = label_index(column_labels, &from.1, "column")?;
            let r1 = label_index(row_labels, &to.0, "row")?;
            let c1 = label_index(column_labels, &to.1, "column")?;
            if r1 < r0 || c1 < c0 {
                return Err(
                    UsageError::PlateGeometry("span endpoints are reversed".to_string()).into(),
                );
            }
            Ok((r1 - r0 + 1, c1 - c0 + 1))
        }
    }
}

/// Spreadsheet-style row label: `A..Z`, then `AA`, `AB`, ...
fn generated_row_label(index: usize) -> String {
    let mut remaining = index + 1;
    let mut label = String::new();
    while remaining > 0 {
        let digit = (remaining - 1) % 26;
        label.insert(0, (b'A' + digit as u8) as char);
        remaining = (remaining - 1) / 26;
    }
    label
}

fn validate_labels(labels: &[String], axis: &str, forbid_numeric: bool) -> Result<()> {
    if labels.is_empty() {
        return Err(UsageError::PlateGeometry(format!("plate must have at least one {axis}")).into());
    }
    for (i, label) in labels.iter().enumerate() {
        if label.is_empty() {
            return Err(
                UsageError::PlateGeometry(format!("{axis} labels must not be empty")).into(),
            );
        }
        if labels[..i].contains(label) {
            return Err(
                UsageError::PlateGeometry(format!("duplicate {axis} label {label:?}")).into(),
            );
        }
        if forbid_numeric && label.chars().all(|c| c.is_ascii_digit()) {
            return Err(UsageError::PlateGeometry(format!(
                "{axis} labels must not be purely numeric ({label:?})"
            ))
            .into());
        }
    }
    Ok(())
}

/// A rectangular array of capped wells.
#[derive(Debug, Clone, PartialEq)]
pub struct Plate {
    name: String,
    make: String,
    row_labels: Vec<String>,
    column_labels: Vec<String>,
    /// Per-well capacity in the volume storage unit.
    max_volume_per_well: f64,
    /// Row-major wells.
    wells: Vec<Container>,
}

impl Plate {
    /// Creates a generic plate with generated labels: rows `A..`, columns
    /// `1..`. `max_volume_per_well` is a volume literal such as `"200 uL"`.
    pub fn new(
        name: &str,
        max_volume_per_well: &str,
        rows: usize,
        columns: usize,
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        let row_labels: Vec<String> = (0..rows).map(generated_row_label).collect();
        let column_labels: Vec<String> = (1..=columns).map(|c| c.to_string()).collect();
        Plate::build(name, "generic", max_volume_per_well, row_labels, column_labels, cfg)
    }

    /// Creates a plate with custom labels. Row labels must not be purely
    /// numeric so they can never be confused with column labels.
    pub fn with_labels(
        name: &str,
        make: &str,
        max_volume_per_well: &str,
        row_labels: &[&str],
        column_labels: &[&str],
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        let row_labels: Vec<String> = row_labels.iter().map(|l| l.to_string()).collect();
        let column_labels: Vec<String> = column_labels.iter().map(|l| l.to_string()).collect();
        Plate::build(name, make, max_volume_per_well, row_labels, column_labels, cfg)
    }

    fn build(
        name: &str,
        make: &str,
        max_volume_per_well: &str,
        row_labels: Vec<String>,
        column_labels: Vec<String>,
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        if name.is_empty() {
            return Err(UsageError::EmptyName("plate name").into());
        }
        validate_labels(&row_labels, "row", true)?;
        validate_labels(&column_labels, "column", false)?;

        let mut wells = Vec::with_capacity(row_labels.len() * column_labels.len());
        for row in &row_labels {
            for column in &column_labels {
                let well = Container::new(
                    &format!("{name} well {row}{column}"),
                    Some(max_volume_per_well),
                    &[],
                    cfg,
                )?;
                wells.push(well);
            }
        }
        let max_volume = wells[0].max_volume();
        Ok(Plate {
            name: name.to_string(),
            make: make.to_string(),
            row_labels,
            column_labels,
            max_volume_per_well: max_volume,
            wells,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn make(&self) -> &str {
        &self.make
    }

    pub fn rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn columns(&self) -> usize {
        self.column_labels.len()
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn column_labels(&self) -> &[String] {
        &self.column_labels
    }

    /// Per-well capacity in the volume storage unit.
    pub fn max_volume_per_well(&self) -> f64 {
        self.max_volume_per_well
    }

    /// Row-major wells.
    pub fn wells(&self) -> &[Container] {
        &self.wells
    }

    /// The well at `(row, column)` coordinates.
    pub fn well(&self, row: usize, column: usize) -> &Container {
        &self.wells[row * self.column_labels.len() + column]
    }

    /// The well addressed by labels.
    pub fn well_at(&self, row: &str, column: &str) -> Result<&Container> {
        let r = label_index(&self.row_labels, row, "row")?;
        let c = label_index(&self.column_labels, column, "column")?;
        Ok(self.well(r, c))
    }

    fn resolve(&self, selector: &WellSelector) -> Result<Vec<(usize, usize)>> {
        resolve(selector, &self.row_labels, &self.column_labels)
    }

    fn index(&self, coord: (usize, usize)) -> usize {
        coord.0 * self.column_labels.len() + coord.1
    }

    /// Adds `quantity` of `substance` to every selected well.
    pub fn add(
        &self,
        selector: &WellSelector,
        substance: &Substance,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        let coords = self.resolve(selector)?;
        let mut next = self.clone();
        for coord in coords {
            let idx = next.index(coord);
            next.wells[idx] = next.wells[idx].add(substance, quantity, cfg)?;
        }
        Ok(next)
    }

    /// Transfers `quantity` from `source` into each selected well, depleting
    /// the source once per well. Returns the updated source and plate.
    pub fn transfer_in(
        &self,
        source: &Container,
        selector: &WellSelector,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<(Container, Plate)> {
        let coords = self.resolve(selector)?;
        let mut next = self.clone();
        let mut source = source.clone();
        for coord in coords {
            let idx = next.index(coord);
            let (depleted, filled) = Container::transfer(&source, &next.wells[idx], quantity, cfg)?;
            source = depleted;
            next.wells[idx] = filled;
        }
        Ok((source, next))
    }

    /// Transfers `quantity` out of each selected well into `destination`,
    /// pooling the draws. Returns the updated plate and destination.
    pub fn transfer_out(
        &self,
        selector: &WellSelector,
        destination: &Container,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<(Plate, Container)> {
        let coords = self.resolve(selector)?;
        let mut next = self.clone();
        let mut destination = destination.clone();
        for coord in coords {
            let idx = next.index(coord);
            let (drained, filled) =
                Container::transfer(&next.wells[idx], &destination, quantity, cfg)?;
            next.wells[idx] = drained;
            destination = filled;
        }
        Ok((next, destination))
    }

    /// Transfers `quantity` between plate regions.
    ///
    /// Legal shape patterns: single to single, single fanned out to a
    /// region, a region pooled into a single well, or two regions of
    /// identical shape moved pairwise. Anything else is a shape mismatch.
    /// When both plates are the same (by name) the moves happen within one
    /// working copy, and both returned plates are that copy.
    pub fn transfer_slice(
        source_plate: &Plate,
        source_selector: &WellSelector,
        destination_plate: &Plate,
        destination_selector: &WellSelector,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<(Plate, Plate)> {
        let src_coords = resolve(
            source_selector,
            &source_plate.row_labels,
            &source_plate.column_labels,
        )?;
        let dst_coords = resolve(
            destination_selector,
            &destination_plate.row_labels,
            &destination_plate.column_labels,
        )?;
        let src_shape = selection_shape(
            source_selector,
            &source_plate.row_labels,
            &source_plate.column_labels,
        )?;
        let dst_shape = selection_shape(
            destination_selector,
            &destination_plate.row_labels,
            &destination_plate.column_labels,
        )?;

        let pairs: Vec<((usize, usize), (usize, usize))> = if src_coords.len() == 1 {
            dst_coords.iter().map(|d| (src_coords[0], *d)).collect()
        } else if dst_coords.len() == 1 {
            src_coords.iter().map(|s| (*s, dst_coords[0])).collect()
        } else if src_shape == dst_shape {
            src_coords.iter().copied().zip(dst_coords).collect()
        } else {
            return Err(UsageError::ShapeMismatch.into());
        };

        if source_plate.name == destination_plate.name {
            let mut working = source_plate.clone();
            for (src, dst) in pairs {
                let src_idx = working.index(src);
                let dst_idx = working.index(dst);
                let (drained, filled) =
                    Container::transfer(&working.wells[src_idx], &working.wells[dst_idx], quantity, cfg)?;
                working.wells[src_idx] = drained;
                working.wells[dst_idx] = filled;
            }
            return Ok((working.clone(), working));
        }

        let mut src_plate = source_plate.clone();
        let mut dst_plate = destination_plate.clone();
        for (src, dst) in pairs {
            let src_idx = src_plate.index(src);
            let dst_idx = dst_plate.index(dst);
            let (drained, filled) =
                Container::transfer(&src_plate.wells[src_idx], &dst_plate.wells[dst_idx], quantity, cfg)?;
            src_plate.wells[src_idx] = drained;
            dst_plate.wells[dst_idx] = filled;
        }
        Ok((src_plate, dst_plate))
    }

    /// Fills every selected well with `solvent` up to `quantity`.
    pub fn fill_to(
        &self,
        selector: &WellSelector,
        solvent: &Substance,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        let coords = self.resolve(selector)?;
        let mut next = self.clone();
        for coord in coords {
            let idx = next.index(coord);
            next.wells[idx] = next.wells[idx].fill_to(solvent, quantity, cfg)?;
        }
        Ok(next)
    }

    /// Removes a kind or substance from every selected well.
    pub fn remove(
        &self,
        selector: &WellSelector,
        what: &RemoveTarget,
        cfg: &UnitConfig,
    ) -> Result<Plate> {
        let coords = self.resolve(selector)?;
        let mut next = self.clone();
        for coord in coords {
            let idx = next.index(coord);
            next.wells[idx] = next.wells[idx].remove(what, cfg)?;
        }
        Ok(next)
    }

    /// Per-well volumes in `unit`, row-major by row.
    pub fn volumes(&self, unit: &str, cfg: &UnitConfig) -> Result<Vec<Vec<f64>>> {
        let mut grid = Vec::with_capacity(self.rows());
        for r in 0..self.rows() {
            let mut row = Vec::with_capacity(self.columns());
            for c in 0..self.columns() {
                row.push(self.well(r, c).get_volume(unit, cfg)?);
            }
            grid.push(row);
        }
        Ok(grid)
    }

    /// Per-well moles of `substance` in `unit`.
    pub fn moles(&self, substance: &Substance, unit: &str, cfg: &UnitConfig) -> Result<Vec<Vec<f64>>> {
        let mut grid = Vec::with_capacity(self.rows());
        for r in 0..self.rows() {
            let mut row = Vec::with_capacity(self.columns());
            for c in 0..self.columns() {
                let stored = self
                    .well(r, c)
                    .contents()
                    .get(substance)
                    .copied()
                    .unwrap_or(0.0);
                row.push(crate::unit::from_storage(substance, stored, unit, cfg)?);
            }
            grid.push(row);
        }
        Ok(grid)
    }

    /// Total volume across all wells in `unit`.
    pub fn total_volume(&self, unit: &str, cfg: &UnitConfig) -> Result<f64> {
        let mut total = 0.0;
        for well in &self.wells {
            total += well.get_volume(unit, cfg)?;
        }
        Ok(total)
    }

    /// Every substance present anywhere on the plate.
    pub fn substances(&self) -> BTreeSet<&Substance> {
        self.wells
            .iter()
            .flat_map(|well| well.substances())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substance::Kind;
    use crate::{DomainError, Error};

    fn cfg() -> UnitConfig {
        UnitConfig::default()
    }

    fn water() -> Substance {
        Substance::liquid("H2O", 18.0153, 1.0).unwrap()
    }

    fn salt() -> Substance {
        Substance::solid("NaCl", 58.4428).unwrap()
    }

    // recomputed well volumes carry sub-nanoliter rounding drift
    fn assert_row_volumes(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "expected {e} uL, got {a} uL");
        }
    }

    #[test]
    fn test_generated_labels() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 28, 3, &cfg).unwrap();
        assert_eq!(plate.row_labels()[0], "A");
        assert_eq!(plate.row_labels()[25], "Z");
        assert_eq!(plate.row_labels()[26], "AA");
        assert_eq!(plate.row_labels()[27], "AB");
        assert_eq!(plate.column_labels(), ["1", "2", "3"]);
        assert_eq!(plate.wells().len(), 28 * 3);
    }

    #[test]
    fn test_label_validation() {
        let cfg = cfg();
        // purely numeric row labels are ambiguous with column labels
        assert!(matches!(
            Plate::with_labels("p", "custom", "200 uL", &["1", "2"], &["1", "2"], &cfg),
            Err(Error::Usage(UsageError::PlateGeometry(_)))
        ));
        assert!(Plate::with_labels("p", "custom", "200 uL", &["A", "A"], &["1"], &cfg).is_err());
        assert!(Plate::with_labels("p", "custom", "200 uL", &["A", ""], &["1"], &cfg).is_err());
        assert!(Plate::new("p", "200 uL", 0, 12, &cfg).is_err());
    }

    #[test]
    fn test_resolve_selectors() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 8, 12, &cfg).unwrap();
        let rows = plate.row_labels().to_vec();
        let cols = plate.column_labels().to_vec();

        assert_eq!(resolve(&WellSelector::All, &rows, &cols).unwrap().len(), 96);
        assert_eq!(
            resolve(&WellSelector::well("B", "3"), &rows, &cols).unwrap(),
            vec![(1, 2)]
        );
        assert_eq!(
            resolve(&WellSelector::Row("A".to_string()), &rows, &cols)
                .unwrap()
                .len(),
            12
        );
        assert_eq!(
            resolve(&WellSelector::Column("7".to_string()), &rows, &cols)
                .unwrap()
                .len(),
            8
        );
        let span = WellSelector::Span {
            from: ("B".to_string(), "2".to_string()),
            to: ("D".to_string(), "4".to_string()),
        };
        let coords = resolve(&span, &rows, &cols).unwrap();
        assert_eq!(coords.len(), 9);
        assert_eq!(coords[0], (1, 1));
        assert_eq!(coords[8], (3, 3));
    }

    #[test]
    fn test_resolve_unknown_label() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 8, 12, &cfg).unwrap();
        let result = resolve(
            &WellSelector::Row("Q".to_string()),
            plate.row_labels(),
            plate.column_labels(),
        );
        assert!(matches!(
            result,
            Err(Error::Usage(UsageError::UnknownLabel { axis: "row", .. }))
        ));
    }

    #[test]
    fn test_add_fans_out() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 2, 2, &cfg).unwrap();
        let dosed = plate
            .add(&WellSelector::Row("A".to_string()), &water(), "50 uL", &cfg)
            .unwrap();
        let volumes = dosed.volumes("uL", &cfg).unwrap();
        assert_eq!(volumes[0], vec![50.0, 50.0]);
        assert_eq!(volumes[1], vec![0.0, 0.0]);
        // original plate untouched
        assert_eq!(plate.total_volume("uL", &cfg).unwrap(), 0.0);
    }

    #[test]
    fn test_transfer_in_depletes_source_per_well() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 8, 12, &cfg).unwrap();
        let stock = Container::new("stock", None, &[(water(), "10 mL")], &cfg).unwrap();
        let (rest, dosed) = plate
            .transfer_in(&stock, &WellSelector::All, "50 uL", &cfg)
            .unwrap();
        assert!((dosed.total_volume("mL", &cfg).unwrap() - 4.8).abs() < 1e-6);
        assert!((rest.get_volume("mL", &cfg).unwrap() - 5.2).abs() < 1e-6);
    }

    #[test]
    fn test_transfer_in_all_or_nothing() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 8, 12, &cfg).unwrap();
        // only enough for 40 wells
        let stock = Container::new("stock", None, &[(water(), "2 mL")], &cfg).unwrap();
        let result = plate.transfer_in(&stock, &WellSelector::All, "50 uL", &cfg);
        assert!(matches!(
            result,
            Err(Error::Domain(DomainError::InsufficientQuantity { .. }))
        ));
        // callers keep the untouched originals
        assert_eq!(plate.total_volume("uL", &cfg).unwrap(), 0.0);
    }

    #[test]
    fn test_transfer_out_pools() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 2, 3, &cfg).unwrap();
        let dosed = plate
            .add(&WellSelector::All, &water(), "100 uL", &cfg)
            .unwrap();
        let pool = Container::new("pool", None, &[], &cfg).unwrap();
        let (remaining, pool) = dosed
            .transfer_out(&WellSelector::Row("A".to_string()), &pool, "40 uL", &cfg)
            .unwrap();
        assert!((pool.get_volume("uL", &cfg).unwrap() - 120.0).abs() < 1e-6);
        let volumes = remaining.volumes("uL", &cfg).unwrap();
        assert_row_volumes(&volumes[0], &[60.0, 60.0, 60.0]);
        assert_row_volumes(&volumes[1], &[100.0, 100.0, 100.0]);
    }

    #[test]
    fn test_transfer_slice_shapes() {
        let cfg = cfg();
        let source = Plate::new("source", "200 uL", 4, 4, &cfg)
            .unwrap()
            .add(&WellSelector::All, &water(), "100 uL", &cfg)
            .unwrap();
        let target = Plate::new("target", "200 uL", 4, 4, &cfg).unwrap();

        // 1 -> N replication
        let (from, to) = Plate::transfer_slice(
            &source,
            &WellSelector::well("A", "1"),
            &target,
            &WellSelector::Row("B".to_string()),
            "10 uL",
            &cfg,
        )
        .unwrap();
        assert!((from.well_at("A", "1").unwrap().get_volume("uL", &cfg).unwrap() - 60.0).abs() < 1e-6);
        assert_row_volumes(&to.volumes("uL", &cfg).unwrap()[1], &[10.0; 4]);

        // matching-shape pairwise move
        let (_, to) = Plate::transfer_slice(
            &source,
            &WellSelector::Row("A".to_string()),
            &target,
            &WellSelector::Row("C".to_string()),
            "25 uL",
            &cfg,
        )
        .unwrap();
        assert_row_volumes(&to.volumes("uL", &cfg).unwrap()[2], &[25.0; 4]);

        // incompatible shapes
        let result = Plate::transfer_slice(
            &source,
            &WellSelector::Row("A".to_string()),
            &target,
            &WellSelector::Span {
                from: ("A".to_string(), "1".to_string()),
                to: ("B".to_string(), "2".to_string()),
            },
            "10 uL",
            &cfg,
        );
        assert!(matches!(
            result,
            Err(Error::Usage(UsageError::ShapeMismatch))
        ));
    }

    #[test]
    fn test_transfer_slice_within_one_plate() {
        let cfg = cfg();
        let plate = Plate::new("plate", "200 uL", 2, 2, &cfg)
            .unwrap()
            .add(&WellSelector::well("A", "1"), &water(), "80 uL", &cfg)
            .unwrap();
        let (left, right) = Plate::transfer_slice(
            &plate,
            &WellSelector::well("A", "1"),
            &plate,
            &WellSelector::well("B", "2"),
            "30 uL",
            &cfg,
        )
        .unwrap();
        assert_eq!(left, right);
        assert!((left.well_at("A", "1").unwrap().get_volume("uL", &cfg).unwrap() - 50.0).abs() < 1e-6);
        assert!((left.well_at("B", "2").unwrap().get_volume("uL", &cfg).unwrap() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_fill_to_and_remove() {
        let cfg = cfg();
        let plate = Plate::new("plate", "500 uL", 2, 2, &cfg).unwrap();
        let dosed = plate
            .add(&WellSelector::All, &salt(), "1 mg", &cfg)
            .unwrap()
            .fill_to(&WellSelector::All, &water(), "200 uL", &cfg)
            .unwrap();
        let volumes = dosed.volumes("uL", &cfg).unwrap();
        for row in &volumes {
            for volume in row {
                assert!((volume - 200.0).abs() < 1e-6);
            }
        }
        assert_eq!(dosed.substances().len(), 2);

        let dried = dosed
            .remove(&WellSelector::All, &RemoveTarget::Kind(Kind::Liquid), &cfg)
            .unwrap();
        assert_eq!(dried.substances().len(), 1);
        assert!(dried.total_volume("uL", &cfg).unwrap() < 5.0);
    }

    #[test]
    fn test_well_capacity_enforced() {
        let cfg = cfg();
        let plate = Plate::new("plate", "100 uL", 1, 1, &cfg).unwrap();
        let result = plate.add(&WellSelector::All, &water(), "150 uL", &cfg);
        assert!(matches!(
            result,
            Err(Error::Domain(DomainError::ExceededCapacity(_)))
        ));
    }
}
