//! Vessels holding mixtures of substances.
//!
//! A [`Container`] is an immutable value: every operation returns fresh
//! containers and leaves its operands untouched, so a failed step can never
//! leave a vessel half modified. Contents are stored per substance in the
//! configured moles storage unit (raw `U` for enzymes) and the container
//! volume is always recomputed from the contents, never tracked
//! incrementally.
//!
//! Transfers are proportional: moving "10 mL" out of a mixture moves every
//! substance in the same ratio, whichever of the four bases (volume, mass,
//! moles, activity) the quantity names. Solutions to target concentrations
//! are built by solving a small dense linear system over the unknown
//! component amounts.
//!
//! Each container carries an append-only `instructions` string, a
//! human-readable log of how to physically reproduce it at the bench.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::solver;
use crate::substance::{Kind, Substance};
use crate::unit::{self, BaseUnit};
use crate::{DomainError, FormatError, Result, UnitConfig, UsageError};

/// What [`Container::remove`] strips out: a whole class or one substance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveTarget {
    Kind(Kind),
    Substance(Substance),
}

/// Constraints for building a solution.
///
/// Exactly two of the three groups must be set. Per-solute lists must match
/// the number of solutes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolutionSpec {
    /// Target concentration per solute, e.g. `"0.5 M"`.
    pub concentrations: Option<Vec<String>>,
    /// Target quantity per solute, e.g. `"10 g"`.
    pub quantities: Option<Vec<String>>,
    /// Target quantity for the whole solution, e.g. `"100 mL"`.
    pub total_quantity: Option<String>,
}

/// A vessel with a maximum volume holding amounts of substances.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    name: String,
    /// Stored per substance: moles storage unit, or raw `U` for enzymes.
    contents: BTreeMap<Substance, f64>,
    /// Current volume in the volume storage unit.
    volume: f64,
    /// Capacity in the volume storage unit, possibly infinite.
    max_volume: f64,
    instructions: String,
}

/// A solvent for solution construction: a pure substance, or an existing
/// mixture whose averaged properties stand in for one.
enum SolventRef<'a> {
    Pure(&'a Substance),
    Mixture(&'a Container),
}

impl SolventRef<'_> {
    fn name(&self) -> &str {
        match self {
            SolventRef::Pure(substance) => substance.name(),
            SolventRef::Mixture(container) => &container.name,
        }
    }

    /// Quantity of `unit` contributed by one mole of this solvent.
    fn coefficient(&self, unit: BaseUnit, cfg: &UnitConfig) -> Result<f64> {
        match self {
            SolventRef::Pure(substance) => per_unknown(substance, unit, cfg),
            SolventRef::Mixture(container) => {
                let moles = container.get_moles("mol", cfg)?;
                if moles <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: container.name.clone(),
                        basis: "moles",
                    }
                    .into());
                }
                match unit {
                    BaseUnit::Mole => Ok(1.0),
                    BaseUnit::Gram => Ok(container.get_mass("g", cfg)? / moles),
                    BaseUnit::Liter => Ok(container.get_volume("L", cfg)? / moles),
                    BaseUnit::Activity => Ok(0.0),
                }
            }
        }
    }
}

/// Quantity of `unit` per one unit of a substance's unknown basis (one mole,
/// or one `U` for enzymes).
fn per_unknown(substance: &Substance, unit: BaseUnit, cfg: &UnitConfig) -> Result<f64> {
    let basis = if substance.is_enzyme() { "U" } else { "mol" };
    unit::convert_from(substance, 1.0, basis, unit.symbol(), cfg)
}

/// Amount of `solute` (in its unknown basis) carried along per mole of
/// solvent, covering the case where the solvent already contains the solute.
fn overlap_fraction(solute: &Substance, solvent: &SolventRef, cfg: &UnitConfig) -> Result<f64> {
    match solvent {
        SolventRef::Pure(substance) => Ok(if *substance == solute { 1.0 } else { 0.0 }),
        SolventRef::Mixture(container) => {
            let stored = container.contents.get(solute).copied().unwrap_or(0.0);
            if stored == 0.0 {
                return Ok(0.0);
            }
            if solute.is_enzyme() {
                let moles = container.get_moles("mol", cfg)?;
                if moles <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: container.name.clone(),
                        basis: "moles",
                    }
                    .into());
                }
                Ok(stored / moles)
            } else {
                let total: f64 = container
                    .contents
                    .iter()
                    .filter(|(substance, _)| !substance.is_enzyme())
                    .map(|(_, amount)| amount)
                    .sum();
                Ok(stored / total)
            }
        }
    }
}

fn standard_amount(substance: &Substance, stored: f64, cfg: &UnitConfig) -> Result<String> {
    let (value, unit) = unit::to_standard_format(substance, stored, cfg)?;
    let precision = cfg.precision_for(&unit);
    Ok(format!(
        "{} {} of {}",
        unit::round_to(value, precision),
        unit,
        substance.name()
    ))
}

fn volume_of_contents(contents: &BTreeMap<Substance, f64>, cfg: &UnitConfig) -> Result<f64> {
    let mut volume = 0.0;
    for (substance, amount) in contents {
        volume += unit::from_storage(substance, *amount, &cfg.volume_storage_unit, cfg)?;
    }
    Ok(unit::round_to(volume, cfg.internal_precision))
}

impl Container {
    /// Creates a container, optionally capped at `max_volume` (a volume
    /// literal such as `"250 mL"`; `None` means unbounded) and seeded with
    /// `initial_contents`.
    pub fn new(
        name: &str,
        max_volume: Option<&str>,
        initial_contents: &[(Substance, &str)],
        cfg: &UnitConfig,
    ) -> Result<Container> {
        if name.is_empty() {
            return Err(UsageError::EmptyName("container name").into());
        }
        let max_volume_stored = match max_volume {
            Some(text) => {
                let parsed = unit::parse_quantity(text)?;
                if parsed.unit != BaseUnit::Liter {
                    return Err(FormatError::InvalidUnit(text.to_string()).into());
                }
                if parsed.value <= 0.0 {
                    return Err(DomainError::NonPositive("maximum volume").into());
                }
                unit::convert_to_storage(parsed.value, "L", cfg)?
            }
            None => f64::INFINITY,
        };

        let mut container = Container {
            name: name.to_string(),
            contents: BTreeMap::new(),
            volume: 0.0,
            max_volume: max_volume_stored,
            instructions: String::new(),
        };
        for (substance, quantity) in initial_contents {
            container.push_contents(substance, quantity, cfg)?;
        }

        let capacity_suffix = if container.max_volume.is_finite() {
            let liters = unit::convert_from_storage(container.max_volume, "L", cfg)?;
            format!("{} L", unit::round_to(liters, cfg.precision_for("L")))
        } else {
            String::new()
        };
        container.instructions = if container.contents.is_empty() {
            if capacity_suffix.is_empty() {
                "Create a container.".to_string()
            } else {
                format!("Create a {capacity_suffix} container.")
            }
        } else {
            let mut parts = Vec::new();
            for (substance, amount) in &container.contents {
                parts.push(standard_amount(substance, *amount, cfg)?);
            }
            if capacity_suffix.is_empty() {
                format!("Add {} to a container.", parts.join(", "))
            } else {
                format!("Add {} to a {capacity_suffix} container.", parts.join(", "))
            }
        };
        Ok(container)
    }

    /// Empty unbounded placeholder used by recipes to reserve a name before
    /// the creating step has been replayed.
    pub(crate) fn pending(name: &str) -> Container {
        Container {
            name: name.to_string(),
            contents: BTreeMap::new(),
            volume: 0.0,
            max_volume: f64::INFINITY,
            instructions: String::new(),
        }
    }

    /// Adds a quantity directly into the contents map, checking capacity.
    fn push_contents(&mut self, substance: &Substance, quantity: &str, cfg: &UnitConfig) -> Result<()> {
        let volume_to_add = unit::convert(substance, quantity, &cfg.volume_storage_unit, cfg)?;
        let amount_to_add = if substance.is_enzyme() {
            unit::convert(substance, quantity, "U", cfg)?
        } else {
            unit::convert(substance, quantity, &cfg.moles_storage_unit, cfg)?
        };
        if self.volume + volume_to_add > self.max_volume {
            return Err(DomainError::ExceededCapacity(self.name.clone()).into());
        }
        self.volume = unit::round_to(self.volume + volume_to_add, cfg.internal_precision);
        let entry = self.contents.entry(substance.clone()).or_insert(0.0);
        *entry = unit::round_to(*entry + amount_to_add, cfg.internal_precision);
        Ok(())
    }

    /// Returns a new container with `quantity` of `substance` added.
    pub fn add(&self, substance: &Substance, quantity: &str, cfg: &UnitConfig) -> Result<Container> {
        let mut next = self.clone();
        next.push_contents(substance, quantity, cfg)?;
        next.instructions
            .push_str(&format!("\nAdd {} of {}.", quantity, substance.name()));
        Ok(next)
    }

    /// Moves `quantity` from `source` to `destination` proportionally.
    ///
    /// The quantity picks the ratio basis: volume, mass, moles (enzymes
    /// excluded from the total), or activity (enzymes only). Every substance
    /// in the source moves by the same ratio, so the transferred portion has
    /// the source's composition. Returns the updated `(source, destination)`
    /// pair.
    pub fn transfer(
        source: &Container,
        destination: &Container,
        quantity: &str,
        cfg: &UnitConfig,
    ) -> Result<(Container, Container)> {
        let parsed = unit::parse_quantity(quantity)?;
        let ratio = match parsed.unit {
            BaseUnit::Liter => {
                let volume_to_transfer = unit::convert_to_storage(parsed.value, "L", cfg)?;
                if source.volume <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: source.name.clone(),
                        basis: "volume",
                    }
                    .into());
                }
                if volume_to_transfer > source.volume {
                    return Err(DomainError::InsufficientQuantity {
                        container: source.name.clone(),
                        available: unit::convert_from_storage(source.volume, "mL", cfg)?,
                        needed: unit::convert_from_storage(volume_to_transfer, "mL", cfg)?,
                        unit: "mL".to_string(),
                    }
                    .into());
                }
                volume_to_transfer / source.volume
            }
            BaseUnit::Gram => {
                let total_mass = source.get_mass("g", cfg)?;
                if total_mass <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: source.name.clone(),
                        basis: "mass",
                    }
                    .into());
                }
                if parsed.value > total_mass {
                    return Err(DomainError::InsufficientQuantity {
                        container: source.name.clone(),
                        available: total_mass,
                        needed: parsed.value,
                        unit: "g".to_string(),
                    }
                    .into());
                }
                parsed.value / total_mass
            }
            BaseUnit::Mole => {
                let moles_to_transfer = unit::convert_to_storage(parsed.value, "mol", cfg)?;
                let total_moles: f64 = source
                    .contents
                    .iter()
                    .filter(|(substance, _)| !substance.is_enzyme())
                    .map(|(_, amount)| amount)
                    .sum();
                if total_moles <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: source.name.clone(),
                        basis: "moles",
                    }
                    .into());
                }
                if moles_to_transfer > total_moles {
                    return Err(DomainError::InsufficientQuantity {
                        container: source.name.clone(),
                        available: total_moles,
                        needed: moles_to_transfer,
                        unit: cfg.moles_storage_unit.clone(),
                    }
                    .into());
                }
                moles_to_transfer / total_moles
            }
            BaseUnit::Activity => {
                let total_activity = source.get_activity();
                if total_activity <= 0.0 {
                    return Err(DomainError::ZeroTotal {
                        container: source.name.clone(),
                        basis: "activity",
                    }
                    .into());
                }
                if parsed.value > total_activity {
                    return Err(DomainError::InsufficientQuantity {
                        container: source.name.clone(),
                        available: total_activity,
                        needed: parsed.value,
                        unit: "U".to_string(),
                    }
                    .into());
                }
                parsed.value / total_activity
            }
        };

        let mut new_source = source.clone();
        let mut new_destination = destination.clone();
        for (substance, amount) in &source.contents {
            let moved = amount * ratio;
            let gained = new_destination.contents.entry(substance.clone()).or_insert(0.0);
            *gained = unit::round_to(*gained + moved, cfg.internal_precision);
            if let Some(remaining) = new_source.contents.get_mut(substance) {
                *remaining = unit::round_to(*remaining - moved, cfg.internal_precision);
            }
        }

        // instruction from the pre-transfer totals
        let (moved_display, display_unit) = if source.has_liquid() {
            let liters = unit::convert_from_storage(ratio * source.volume, "L", cfg)?;
            unit::get_human_readable_unit(liters, "L")
        } else {
            let grams = source.get_mass("g", cfg)? * ratio;
            unit::get_human_readable_unit(grams, "g")
        };
        let precision = cfg.precision_for(&display_unit);
        new_destination.instructions.push_str(&format!(
            "\nTransfer {} {} of {} to {}.",
            unit::round_to(moved_display, precision),
            display_unit,
            source.name,
            destination.name
        ));

        new_destination.volume = volume_of_contents(&new_destination.contents, cfg)?;
        if new_destination.volume > new_destination.max_volume {
            return Err(DomainError::ExceededCapacity(new_destination.name.clone()).into());
        }
        new_source.volume = volume_of_contents(&new_source.contents, cfg)?;
        Ok((new_source, new_destination))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accumulated bench instructions for reproducing this container.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Stored amounts per substance (storage scale, raw `U` for enzymes).
    pub fn contents(&self) -> &BTreeMap<Substance, f64> {
        &self.contents
    }

    /// Capacity in the volume storage unit, possibly infinite.
    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    /// Current volume in `unit`.
    pub fn get_volume(&self, unit: &str, cfg: &UnitConfig) -> Result<f64> {
        unit::convert_from_storage(self.volume, unit, cfg)
    }

    /// Total mass of all contents in `unit`, enzymes included through their
    /// specific activity.
    pub fn get_mass(&self, unit: &str, cfg: &UnitConfig) -> Result<f64> {
        let mut total = 0.0;
        for (substance, amount) in &self.contents {
            total += unit::from_storage(substance, *amount, unit, cfg)?;
        }
        Ok(total)
    }

    /// Total moles of all non-enzyme contents in `unit`.
    pub fn get_moles(&self, unit: &str, cfg: &UnitConfig) -> Result<f64> {
        let stored: f64 = self
            .contents
            .iter()
            .filter(|(substance, _)| !substance.is_enzyme())
            .map(|(_, amount)| amount)
            .sum();
        unit::convert_from_storage(stored, unit, cfg)
    }

    /// Total enzyme activity in `U`.
    pub fn get_activity(&self) -> f64 {
        self.contents
            .iter()
            .filter(|(substance, _)| substance.is_enzyme())
            .map(|(_, amount)| amount)
            .sum()
    }

    /// Concentration of `solute` expressed in `units` (e.g. `"M"`,
    /// `"g/mL"`). A solute that is absent reads as zero.
    pub fn get_concentration(&self, solute: &Substance, units: &str, cfg: &UnitConfig) -> Result<f64> {
        let parsed = unit::parse_concentration(&format!("1 {units}"), cfg)?;
        let stored = self.contents.get(solute).copied().unwrap_or(0.0);
        let numerator = unit::from_storage(solute, stored, parsed.numerator.symbol(), cfg)?;
        if numerator == 0.0 {
            return Ok(0.0);
        }
        let denominator = if parsed.denominator == BaseUnit::Liter {
            self.get_volume("L", cfg)?
        } else {
            let mut total = 0.0;
            for (substance, amount) in &self.contents {
                total += unit::from_storage(substance, *amount, parsed.denominator.symbol(), cfg)?;
            }
            total
        };
        if denominator <= 0.0 {
            return Err(DomainError::ZeroTotal {
                container: self.name.clone(),
                basis: "denominator",
            }
            .into());
        }
        Ok(unit::round_to(
            numerator / denominator / parsed.value,
            cfg.internal_precision,
        ))
    }

    /// True if any content is a liquid.
    pub fn has_liquid(&self) -> bool {
        self.contents.keys().any(|substance| substance.is_liquid())
    }

    /// Substances present in this container.
    pub fn substances(&self) -> impl Iterator<Item = &Substance> {
        self.contents.keys()
    }

    /// Builds a solution of `solutes` in a pure `solvent` satisfying `spec`.
    ///
    /// When `name` is `None` one is generated from the component names.
    pub fn create_solution(
        solutes: &[Substance],
        solvent: &Substance,
        name: Option<&str>,
        spec: &SolutionSpec,
        cfg: &UnitConfig,
    ) -> Result<Container> {
        let solvent_ref = SolventRef::Pure(solvent);
        let xs = solve_solution(solutes, &solvent_ref, spec, cfg)?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| auto_solution_name(solutes, &solvent_ref));

        let mut pairs: Vec<(Substance, String)> = solutes
            .iter()
            .zip(&xs)
            .map(|(substance, x)| (substance.clone(), unknown_quantity(substance, *x)))
            .collect();
        pairs.push((solvent.clone(), format!("{} mol", xs[solutes.len()])));
        let view: Vec<(Substance, &str)> = pairs
            .iter()
            .map(|(substance, quantity)| (substance.clone(), quantity.as_str()))
            .collect();
        Container::new(&name, None, &view, cfg)
    }

    /// Builds a solution drawing the solvent out of an existing container.
    ///
    /// The solvent mixture is treated through its averaged molar properties
    /// and depleted by a mole-basis transfer. Returns the depleted solvent
    /// container and the new solution.
    pub fn create_solution_from(
        solutes: &[Substance],
        solvent: &Container,
        name: Option<&str>,
        spec: &SolutionSpec,
        cfg: &UnitConfig,
    ) -> Result<(Container, Container)> {
        let solvent_ref = SolventRef::Mixture(solvent);
        let xs = solve_solution(solutes, &solvent_ref, spec, cfg)?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| auto_solution_name(solutes, &solvent_ref));

        let pairs: Vec<(Substance, String)> = solutes
            .iter()
            .zip(&xs)
            .map(|(substance, x)| (substance.clone(), unknown_quantity(substance, *x)))
            .collect();
        let view: Vec<(Substance, &str)> = pairs
            .iter()
            .map(|(substance, quantity)| (substance.clone(), quantity.as_str()))
            .collect();
        let partial = Container::new(&name, None, &view, cfg)?;

        let mut parts = Vec::new();
        for (substance, amount) in &partial.contents {
            parts.push(standard_amount(substance, *amount, cfg)?);
        }

        let solvent_amount = format!("{} mol", xs[solutes.len()]);
        let (residual_solvent, mut solution) =
            Container::transfer(solvent, &partial, &solvent_amount, cfg)?;

        let moved_volume = unit::convert_from_storage(solution.volume - partial.volume, "L", cfg)?;
        let (display, display_unit) = unit::get_human_readable_unit(moved_volume, "L");
        solution.instructions = format!(
            "Add {} to {} {} of {}.",
            parts.join(", "),
            unit::round_to(display, cfg.precision_for(&display_unit)),
            display_unit,
            solvent.name
        );
        Ok((residual_solvent, solution))
    }

    /// Dilutes `solute` down to `concentration` by adding a pure solvent.
    ///
    /// A target within 1e-6 of the current ratio is a no-op; a higher target
    /// is an error. The result is renamed when `name` is given.
    pub fn dilute(
        &self,
        solute: &Substance,
        concentration: &str,
        solvent: &Substance,
        name: Option<&str>,
        cfg: &UnitConfig,
    ) -> Result<Container> {
        let stored_solute = self.stored_solute(solute)?;
        let (new_ratio, _, _) = unit::concentration_ratio(solute, concentration, solvent, cfg)?;
        match self.check_dilution_ratio(stored_solute, new_ratio)? {
            DilutionAction::NoOp => {
                let mut same = self.clone();
                if let Some(n) = name {
                    same.name = n.to_string();
                }
                return Ok(same);
            }
            DilutionAction::Proceed => {}
        }

        let current_solvent = self.contents.get(solvent).copied().unwrap_or(0.0);
        let required_stored = stored_solute / new_ratio - current_solvent;
        let added_volume = unit::from_storage(solvent, required_stored, &cfg.volume_storage_unit, cfg)?;
        if self.volume + added_volume > self.max_volume {
            return Err(DomainError::ExceededCapacity(self.name.clone()).into());
        }

        let mut next = self.clone();
        if let Some(n) = name {
            next.name = n.to_string();
        }
        next.push_contents(
            solvent,
            &format!("{} {}", required_stored, cfg.moles_storage_unit),
            cfg,
        )?;
        let added_liters = unit::from_storage(solvent, required_stored, "L", cfg)?;
        let (display, display_unit) = unit::get_human_readable_unit(added_liters, "L");
        next.instructions.push_str(&format!(
            "\nDilute with {} {} of {}.",
            unit::round_to(display, cfg.precision_for(&display_unit)),
            display_unit,
            solvent.name()
        ));
        Ok(next)
    }

    /// Dilutes `solute` down to `concentration` drawing solvent from another
    /// container. Returns the depleted solvent container and the diluted
    /// solution.
    pub fn dilute_from(
        &self,
        solute: &Substance,
        concentration: &str,
        solvent: &Container,
        name: Option<&str>,
        cfg: &UnitConfig,
    ) -> Result<(Container, Container)> {
        let stored_solute = self.stored_solute(solute)?;

        // collapse the solvent mixture into an averaged liquid for the ratio
        // math
        let total_mass = solvent.get_mass("g", cfg)?;
        let total_moles = solvent.get_moles("mol", cfg)?;
        let total_volume = solvent.get_volume("mL", cfg)?;
        if total_moles <= 0.0 || total_volume <= 0.0 {
            return Err(DomainError::ZeroTotal {
                container: solvent.name.clone(),
                basis: "moles",
            }
            .into());
        }
        let averaged = Substance::liquid(
            &solvent.name,
            total_mass / total_moles,
            total_mass / total_volume,
        )?;

        let (new_ratio, _, _) = unit::concentration_ratio(solute, concentration, &averaged, cfg)?;
        match self.check_dilution_ratio(stored_solute, new_ratio)? {
            DilutionAction::NoOp => {
                let mut same = self.clone();
                if let Some(n) = name {
                    same.name = n.to_string();
                }
                return Ok((solvent.clone(), same));
            }
            DilutionAction::Proceed => {}
        }

        // solvent moles already in the mixture count toward the target ratio
        let existing_solvent: f64 = self
            .contents
            .iter()
            .filter(|(substance, _)| !substance.is_enzyme() && *substance != solute)
            .map(|(_, amount)| amount)
            .sum();
        let required_stored = stored_solute / new_ratio - existing_solvent;
        let needed_liters = unit::from_storage(&averaged, required_stored, "L", cfg)?;

        let mut destination = self.clone();
        if let Some(n) = name {
            destination.name = n.to_string();
        }
        let (residual_solvent, mut diluted) =
            Container::transfer(solvent, &destination, &format!("{needed_liters} L"), cfg)?;
        let (display, display_unit) = unit::get_human_readable_unit(needed_liters, "L");
        diluted.instructions.push_str(&format!(
            "\nDilute with {} {} of {}.",
            unit::round_to(display, cfg.precision_for(&display_unit)),
            display_unit,
            solvent.name
        ));
        Ok((residual_solvent, diluted))
    }

    fn stored_solute(&self, solute: &Substance) -> Result<f64> {
        self.contents
            .get(solute)
            .copied()
            .ok_or_else(|| {
                DomainError::MissingSubstance {
                    container: self.name.clone(),
                    substance: solute.name().to_string(),
                }
                .into()
            })
    }

    fn check_dilution_ratio(&self, stored_solute: f64, new_ratio: f64) -> Result<DilutionAction> {
        if new_ratio <= 0.0 {
            return Err(DomainError::ImpossibleSolution.into());
        }
        let total_moles: f64 = self
            .contents
            .iter()
            .filter(|(substance, _)| !substance.is_enzyme())
            .map(|(_, amount)| amount)
            .sum();
        if total_moles <= 0.0 {
            return Err(DomainError::ZeroTotal {
                container: self.name.clone(),
                basis: "moles",
            }
            .into());
        }
        let current_ratio = stored_solute / total_moles;
        if (new_ratio - current_ratio).abs() <= 1e-6 {
            return Ok(DilutionAction::NoOp);
        }
        if new_ratio > current_ratio {
            return Err(DomainError::CannotConcentrate.into());
        }
        Ok(DilutionAction::Proceed)
    }

    /// Adds `solvent` until the total quantity reaches `quantity` (a mass,
    /// volume, or mole target). A target below the current quantity is an
    /// error.
    pub fn fill_to(&self, solvent: &Substance, quantity: &str, cfg: &UnitConfig) -> Result<Container> {
        let parsed = unit::parse_quantity(quantity)?;
        if parsed.unit == BaseUnit::Activity {
            return Err(FormatError::InvalidUnit(quantity.to_string()).into());
        }
        if parsed.value <= 0.0 {
            return Err(DomainError::NonPositive("target quantity").into());
        }
        let unit_symbol = parsed.unit.symbol();
        let mut current = 0.0;
        for (substance, amount) in &self.contents {
            current += unit::from_storage(substance, *amount, unit_symbol, cfg)?;
        }
        let gap = parsed.value - current;
        if gap < 0.0 {
            return Err(DomainError::NonPositive("required fill amount").into());
        }

        let mut next = self.clone();
        next.push_contents(solvent, &format!("{gap} {unit_symbol}"), cfg)?;
        let added_liters = unit::convert_from(solvent, gap, unit_symbol, "L", cfg)?;
        let (display, display_unit) = unit::get_human_readable_unit(added_liters, "L");
        next.instructions.push_str(&format!(
            "\nFill with {} {} of {}.",
            unit::round_to(display, cfg.precision_for(&display_unit)),
            display_unit,
            solvent.name()
        ));
        Ok(next)
    }

    /// Removes all of a substance kind or a specific substance and
    /// recomputes the volume.
    pub fn remove(&self, what: &RemoveTarget, cfg: &UnitConfig) -> Result<Container> {
        let mut next = self.clone();
        next.contents.retain(|substance, _| match what {
            RemoveTarget::Kind(kind) => substance.kind() != *kind,
            RemoveTarget::Substance(target) => substance != target,
        });
        next.volume = volume_of_contents(&next.contents, cfg)?;
        let label = match what {
            RemoveTarget::Kind(kind) => format!("{kind}s"),
            RemoveTarget::Substance(substance) => substance.name().to_string(),
        };
        next.instructions.push_str(&format!("\nRemove all {label}."));
        Ok(next)
    }
}

enum DilutionAction {
    NoOp,
    Proceed,
}

fn unknown_quantity(substance: &Substance, x: f64) -> String {
    if substance.is_enzyme() {
        format!("{x} U")
    } else {
        format!("{x} mol")
    }
}

fn auto_solution_name(solutes: &[Substance], solvent: &SolventRef) -> String {
    let solute_names = solutes
        .iter()
        .map(|substance| substance.name())
        .collect::<Vec<_>>()
        .join(", ");
    let solvent_part = match solvent {
        SolventRef::Pure(substance) => substance.name().to_string(),
        SolventRef::Mixture(container) if container.contents.len() == 1 => container
            .contents
            .keys()
            .next()
            .map(|substance| substance.name().to_string())
            .unwrap_or_default(),
        SolventRef::Mixture(container) => {
            format!("contents of Container '{}'", container.name)
        }
    };
    format!("Solution of {solute_names} in {solvent_part}")
}

/// Solves for the unknown amounts (moles, or `U` for enzyme solutes) of each
/// component of a solution satisfying the requested constraints.
fn solve_solution(
    solutes: &[Substance],
    solvent: &SolventRef,
    spec: &SolutionSpec,
    cfg: &UnitConfig,
) -> Result<Vec<f64>> {
    if solutes.is_empty() {
        return Err(UsageError::EmptyName("solute list").into());
    }
    for (i, substance) in solutes.iter().enumerate() {
        if solutes[..i].contains(substance) {
            return Err(UsageError::DuplicateSolute(substance.name().to_string()).into());
        }
    }
    let groups = spec.concentrations.is_some() as u32
        + spec.quantities.is_some() as u32
        + spec.total_quantity.is_some() as u32;
    if groups != 2 {
        return Err(UsageError::WrongConstraintCount.into());
    }

    let n = solutes.len();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut rhs: Vec<f64> = Vec::new();

    // one row per target concentration: c * total(denominator) -
    // solute(numerator) = 0
    if let Some(concentrations) = &spec.concentrations {
        if concentrations.len() != n {
            return Err(UsageError::ConstraintLengthMismatch("concentration").into());
        }
        for (idx, text) in concentrations.iter().enumerate() {
            let target = unit::parse_concentration(text, cfg)?;
            let mut row = vec![0.0; n + 1];
            for (j, substance) in solutes.iter().enumerate() {
                row[j] = target.value * per_unknown(substance, target.denominator, cfg)?;
            }
            row[n] = target.value * solvent.coefficient(target.denominator, cfg)?;
            let numerator_coeff = per_unknown(&solutes[idx], target.numerator, cfg)?;
            row[idx] -= numerator_coeff;
            row[n] -= numerator_coeff * overlap_fraction(&solutes[idx], solvent, cfg)?;
            rows.push(row);
            rhs.push(0.0);
        }
    }

    // one row per target solute quantity
    if let Some(quantities) = &spec.quantities {
        if quantities.len() != n {
            return Err(UsageError::ConstraintLengthMismatch("quantity").into());
        }
        for (idx, text) in quantities.iter().enumerate() {
            let target = unit::parse_quantity(text)?;
            let mut row = vec![0.0; n + 1];
            let coeff = per_unknown(&solutes[idx], target.unit, cfg)?;
            row[idx] = coeff;
            row[n] = coeff * overlap_fraction(&solutes[idx], solvent, cfg)?;
            rows.push(row);
            rhs.push(target.value);
        }
    }

    // one row for the total quantity of the whole solution
    if let Some(text) = &spec.total_quantity {
        let target = unit::parse_quantity(text)?;
        let mut row = vec![0.0; n + 1];
        for (j, substance) in solutes.iter().enumerate() {
            row[j] = per_unknown(substance, target.unit, cfg)?;
        }
        row[n] = solvent.coefficient(target.unit, cfg)?;
        rows.push(row);
        rhs.push(target.value);
    }

    let square = n + 1;
    let full_a = DMatrix::from_fn(rows.len(), square, |r, c| rows[r][c]);
    let full_b = DVector::from_fn(rhs.len(), |r, _| rhs[r]);
    let a = full_a.rows(0, square).into_owned();
    let b = full_b.rows(0, square).into_owned();
    let x = solver::solve_dense(a, b)?;

    if x.iter().any(|value| *value <= 0.0) {
        return Err(DomainError::ImpossibleSolution.into());
    }
    // every constraint must hold, including rows beyond the square system
    if !solver::verify_solution(&full_a, &x, &full_b, 1e-6) {
        return Err(DomainError::ImpossibleSolution.into());
    }
    Ok(x.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn cfg() -> UnitConfig {
        UnitConfig::default()
    }

    fn water() -> Substance {
        Substance::liquid("H2O", 18.0153, 1.0).unwrap()
    }

    fn salt() -> Substance {
        Substance::solid("NaCl", 58.4428).unwrap()
    }

    fn amylase() -> Substance {
        Substance::enzyme("amylase", 500.0).unwrap()
    }

    fn salt_water(cfg: &UnitConfig) -> Container {
        Container::new(
            "salt water",
            None,
            &[(salt(), "50 mmol"), (water(), "100 mL")],
            cfg,
        )
        .unwrap()
    }

    #[test]
    fn test_new_container_volume_from_contents() {
        let cfg = cfg();
        let mixture = salt_water(&cfg);
        // water volume plus the salt's estimated volume through the default
        // density
        let salt_ml = 0.05 * 58.4428 / cfg.default_solid_density;
        let expected = 100.0 + salt_ml;
        let volume = mixture.get_volume("mL", &cfg).unwrap();
        assert!((volume - expected).abs() < 1e-6);
        assert!(mixture.instructions().starts_with("Add"));
    }

    #[test]
    fn test_new_rejects_bad_arguments() {
        let cfg = cfg();
        assert!(matches!(
            Container::new("", None, &[], &cfg),
            Err(Error::Usage(_))
        ));
        assert!(Container::new("c", Some("0 mL"), &[], &cfg).is_err());
        assert!(Container::new("c", Some("10 g"), &[], &cfg).is_err());
    }

    #[test]
    fn test_transfer_is_proportional_by_volume() {
        let cfg = cfg();
        let source = salt_water(&cfg);
        let beaker = Container::new("beaker", Some("250 mL"), &[], &cfg).unwrap();
        let total_volume = source.get_volume("mL", &cfg).unwrap();
        let (rest, beaker) = Container::transfer(&source, &beaker, "10 mL", &cfg).unwrap();

        let ratio = 10.0 / total_volume;
        let moved_salt = beaker.contents().get(&salt()).copied().unwrap();
        assert!((moved_salt - 50_000.0 * ratio).abs() < 1e-3);
        let remaining_salt = rest.contents().get(&salt()).copied().unwrap();
        assert!((remaining_salt - 50_000.0 * (1.0 - ratio)).abs() < 1e-3);
        assert!((beaker.get_volume("mL", &cfg).unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_transfer_conserves_mass() {
        let cfg = cfg();
        let source = salt_water(&cfg);
        let beaker = Container::new("beaker", None, &[], &cfg).unwrap();
        let before = source.get_mass("g", &cfg).unwrap();
        let (rest, beaker) = Container::transfer(&source, &beaker, "2 g", &cfg).unwrap();
        let after = rest.get_mass("g", &cfg).unwrap() + beaker.get_mass("g", &cfg).unwrap();
        assert!((before - after).abs() < 1e-6);
        assert!((beaker.get_mass("g", &cfg).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_transfer_by_activity_moves_everything_proportionally() {
        let cfg = cfg();
        let stock = Container::new(
            "enzyme stock",
            None,
            &[(amylase(), "1000 U"), (water(), "10 mL")],
            &cfg,
        )
        .unwrap();
        let vial = Container::new("vial", None, &[], &cfg).unwrap();
        let (rest, vial) = Container::transfer(&stock, &vial, "250 U", &cfg).unwrap();
        assert!((vial.get_activity() - 250.0).abs() < 1e-6);
        assert!((rest.get_activity() - 750.0).abs() < 1e-6);
        // a quarter of the water came along
        assert!((vial.get_volume("mL", &cfg).unwrap() - stock.get_volume("mL", &cfg).unwrap() / 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_transfer_insufficient_leaves_operands_untouched() {
        let cfg = cfg();
        let source = salt_water(&cfg);
        let beaker = Container::new("beaker", None, &[], &cfg).unwrap();
        let before = source.clone();
        let result = Container::transfer(&source, &beaker, "1 L", &cfg);
        assert!(matches!(
            result,
            Err(Error::Domain(DomainError::InsufficientQuantity { .. }))
        ));
        assert_eq!(source, before);
        assert!(beaker.contents().is_empty());
    }

    #[test]
    fn test_transfer_respects_capacity() {
        let cfg = cfg();
        let source = salt_water(&cfg);
        let thimble = Container::new("thimble", Some("1 mL"), &[], &cfg).unwrap();
        let result = Container::transfer(&source, &thimble, "10 mL", &cfg);
        assert!(matches!(
            result,
            Err(Error::Domain(DomainError::ExceededCapacity(_)))
        ));
    }

    #[test]
    fn test_transfer_from_empty_container() {
        let cfg = cfg();
        let empty = Container::new("empty", None, &[], &cfg).unwrap();
        let beaker = Container::new("beaker", None, &[], &cfg).unwrap();
        assert!(matches!(
            Container::transfer(&empty, &beaker, "1 mL", &cfg),
            Err(Error::Domain(DomainError::ZeroTotal { .. }))
        ));
    }

    #[test]
    fn test_create_solution_molarity_and_total_volume() {
        let cfg = cfg();
        let spec = SolutionSpec {
            concentrations: Some(vec!["0.5 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        let solution =
            Container::create_solution(&[salt()], &water(), Some("brine"), &spec, &cfg).unwrap();
        assert!((solution.get_volume("mL", &cfg).unwrap() - 100.0).abs() < 1e-3);
        let molarity = solution.get_concentration(&salt(), "M", &cfg).unwrap();
        assert!((molarity - 0.5).abs() < 1e-6);
        // 0.5 M over 0.1 L means 0.05 mol of salt
        let stored_salt = solution.contents().get(&salt()).copied().unwrap();
        assert!((stored_salt - 50_000.0).abs() < 1.0);
    }

    #[test]
    fn test_create_solution_auto_name() {
        let cfg = cfg();
        let spec = SolutionSpec {
            quantities: Some(vec!["0.01 mol".to_string()]),
            total_quantity: Some("50 mL".to_string()),
            ..SolutionSpec::default()
        };
        let solution = Container::create_solution(&[salt()], &water(), None, &spec, &cfg).unwrap();
        assert_eq!(solution.name(), "Solution of NaCl in H2O");
    }

    #[test]
    fn test_create_solution_constraint_validation() {
        let cfg = cfg();
        let only_one = SolutionSpec {
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        assert!(matches!(
            Container::create_solution(&[salt()], &water(), None, &only_one, &cfg),
            Err(Error::Usage(UsageError::WrongConstraintCount))
        ));

        let mismatched = SolutionSpec {
            concentrations: Some(vec!["1 M".to_string(), "2 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        assert!(matches!(
            Container::create_solution(&[salt()], &water(), None, &mismatched, &cfg),
            Err(Error::Usage(UsageError::ConstraintLengthMismatch(_)))
        ));

        let duplicated = SolutionSpec {
            concentrations: Some(vec!["1 M".to_string(), "1 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        assert!(matches!(
            Container::create_solution(&[salt(), salt()], &water(), None, &duplicated, &cfg),
            Err(Error::Usage(UsageError::DuplicateSolute(_)))
        ));
    }

    #[test]
    fn test_create_solution_impossible_concentration() {
        let cfg = cfg();
        // far beyond the solubility of anything: more salt than fits in the
        // total volume
        let spec = SolutionSpec {
            concentrations: Some(vec!["100 M".to_string()]),
            total_quantity: Some("10 mL".to_string()),
            ..SolutionSpec::default()
        };
        let result = Container::create_solution(&[salt()], &water(), None, &spec, &cfg);
        assert!(matches!(result, Err(Error::Domain(_))));
    }

    #[test]
    fn test_create_solution_from_depletes_stock() {
        let cfg = cfg();
        let stock = Container::new("water stock", None, &[(water(), "500 mL")], &cfg).unwrap();
        let spec = SolutionSpec {
            concentrations: Some(vec!["0.5 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        let (rest, solution) =
            Container::create_solution_from(&[salt()], &stock, None, &spec, &cfg).unwrap();
        assert_eq!(solution.name(), "Solution of NaCl in H2O");
        assert!((solution.get_concentration(&salt(), "M", &cfg).unwrap() - 0.5).abs() < 1e-6);
        let drawn = stock.get_volume("mL", &cfg).unwrap() - rest.get_volume("mL", &cfg).unwrap();
        assert!(drawn > 0.0);
        // conservation across stock and solution
        let water_total = rest.contents().get(&water()).copied().unwrap()
            + solution.contents().get(&water()).copied().unwrap();
        assert!((water_total - stock.contents().get(&water()).copied().unwrap()).abs() < 1e-3);
    }

    #[test]
    fn test_dilute_reaches_target_concentration() {
        let cfg = cfg();
        let spec = SolutionSpec {
            concentrations: Some(vec!["0.5 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        let solution =
            Container::create_solution(&[salt()], &water(), Some("brine"), &spec, &cfg).unwrap();
        let diluted = solution
            .dilute(&salt(), "0.25 M", &water(), Some("half brine"), &cfg)
            .unwrap();
        let molarity = diluted.get_concentration(&salt(), "M", &cfg).unwrap();
        assert!((molarity - 0.25).abs() < 1e-4);
        // salt amount unchanged, only solvent added
        assert_eq!(
            solution.contents().get(&salt()),
            diluted.contents().get(&salt())
        );
        assert_eq!(diluted.name(), "half brine");
    }

    #[test]
    fn test_dilute_rejects_higher_target() {
        let cfg = cfg();
        let spec = SolutionSpec {
            concentrations: Some(vec!["0.5 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        let solution = Container::create_solution(&[salt()], &water(), None, &spec, &cfg).unwrap();
        assert!(matches!(
            solution.dilute(&salt(), "1 M", &water(), None, &cfg),
            Err(Error::Domain(DomainError::CannotConcentrate))
        ));
    }

    #[test]
    fn test_dilute_missing_solute() {
        let cfg = cfg();
        let plain = Container::new("plain", None, &[(water(), "10 mL")], &cfg).unwrap();
        assert!(matches!(
            plain.dilute(&salt(), "0.1 M", &water(), None, &cfg),
            Err(Error::Domain(DomainError::MissingSubstance { .. }))
        ));
    }

    #[test]
    fn test_dilute_from_draws_solvent_out_of_container() {
        let cfg = cfg();
        let spec = SolutionSpec {
            concentrations: Some(vec!["0.5 M".to_string()]),
            total_quantity: Some("100 mL".to_string()),
            ..SolutionSpec::default()
        };
        let solution = Container::create_solution(&[salt()], &water(), None, &spec, &cfg).unwrap();
        let stock = Container::new("water stock", None, &[(water(), "500 mL")], &cfg).unwrap();
        let (rest, diluted) = solution
            .dilute_from(&salt(), "0.25 M", &stock, None, &cfg)
            .unwrap();
        let molarity = diluted.get_concentration(&salt(), "M", &cfg).unwrap();
        assert!((molarity - 0.25).abs() < 1e-4);
        assert!(rest.get_volume("mL", &cfg).unwrap() < 500.0);
    }

    #[test]
    fn test_fill_to_closes_the_gap() {
        let cfg = cfg();
        let mixture = salt_water(&cfg);
        let filled = mixture.fill_to(&water(), "250 mL", &cfg).unwrap();
        assert!((filled.get_volume("mL", &cfg).unwrap() - 250.0).abs() < 1e-6);
        assert!(filled.instructions().contains("Fill with"));
        // target below the current volume is impossible
        assert!(matches!(
            mixture.fill_to(&water(), "1 mL", &cfg),
            Err(Error::Domain(DomainError::NonPositive(_)))
        ));
    }

    #[test]
    fn test_remove_by_kind_and_substance() {
        let cfg = cfg();
        let mixture = Container::new(
            "mixture",
            None,
            &[(salt(), "1 g"), (water(), "10 mL"), (amylase(), "100 U")],
            &cfg,
        )
        .unwrap();

        let no_liquid = mixture.remove(&RemoveTarget::Kind(Kind::Liquid), &cfg).unwrap();
        assert!(!no_liquid.has_liquid());
        assert!(no_liquid.contents().contains_key(&salt()));
        assert!(no_liquid.contents().contains_key(&amylase()));

        let no_salt = mixture
            .remove(&RemoveTarget::Substance(salt()), &cfg)
            .unwrap();
        assert!(!no_salt.contents().contains_key(&salt()));
        // volume recomputed from what is left
        assert!(no_salt.get_volume("mL", &cfg).unwrap() < mixture.get_volume("mL", &cfg).unwrap());
    }

    #[test]
    fn test_add_checks_capacity() {
        let cfg = cfg();
        let small = Container::new("small", Some("5 mL"), &[], &cfg).unwrap();
        assert!(small.add(&water(), "4 mL", &cfg).is_ok());
        assert!(matches!(
            small.add(&water(), "6 mL", &cfg),
            Err(Error::Domain(DomainError::ExceededCapacity(_)))
        ));
    }

    #[test]
    fn test_get_concentration_absent_solute_is_zero() {
        let cfg = cfg();
        let plain = Container::new("plain", None, &[(water(), "10 mL")], &cfg).unwrap();
        assert_eq!(plain.get_concentration(&salt(), "M", &cfg).unwrap(), 0.0);
    }

    #[test]
    fn test_instructions_accumulate() {
        let cfg = cfg();
        let source = salt_water(&cfg);
        let beaker = Container::new("beaker", None, &[], &cfg).unwrap();
        let (_, beaker) = Container::transfer(&source, &beaker, "10 mL", &cfg).unwrap();
        let filled = beaker.fill_to(&water(), "50 mL", &cfg).unwrap();
        let lines: Vec<&str> = filled.instructions().lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Create"));
        assert!(lines[1].starts_with("Transfer"));
        assert!(lines[2].starts_with("Fill"));
    }
}
