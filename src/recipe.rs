//! Declarative step ledgers over containers and plates.
//!
//! A [`Recipe`] records bench operations symbolically (by object name) while
//! it is open, then replays the whole sequence in one `bake` pass to produce
//! final vessel states. Each replayed step keeps before/after snapshots of the
//! vessels it touched, so a baked recipe can answer historical questions: how
//! much of a substance flowed into a set of destinations, what went in and out
//! of a given vessel, how much was left at a stage boundary.
//!
//! Steps may be grouped into named stages. The implicit stage `"all"` always
//! covers the entire recipe. A baked recipe is locked: further steps and
//! re-baking are rejected, which keeps every query answer stable.

use std::collections::{BTreeMap, BTreeSet};

use crate::container::{Container, RemoveTarget, SolutionSpec};
use crate::plate::{Plate, WellSelector};
use crate::substance::Substance;
use crate::{unit, DomainError, Result, UnitConfig, UsageError};

/// A container or a plate tracked by a recipe.
#[derive(Debug, Clone, PartialEq)]
pub enum Vessel {
    Container(Container),
    Plate(Plate),
}

impl Vessel {
    pub fn name(&self) -> &str {
        match self {
            Vessel::Container(container) => container.name(),
            Vessel::Plate(plate) => plate.name(),
        }
    }

    /// Stored amount of `substance` (storage scale, raw `U` for enzymes).
    fn stored_amount(&self, substance: &Substance) -> f64 {
        match self {
            Vessel::Container(container) => {
                container.contents().get(substance).copied().unwrap_or(0.0)
            }
            Vessel::Plate(plate) => plate
                .wells()
                .iter()
                .map(|well| well.contents().get(substance).copied().unwrap_or(0.0))
                .sum(),
        }
    }

    fn stored_totals(&self) -> BTreeMap<Substance, f64> {
        let mut totals = BTreeMap::new();
        match self {
            Vessel::Container(container) => {
                for (substance, amount) in container.contents() {
                    totals.insert(substance.clone(), *amount);
                }
            }
            Vessel::Plate(plate) => {
                for well in plate.wells() {
                    for (substance, amount) in well.contents() {
                        *totals.entry(substance.clone()).or_insert(0.0) += *amount;
                    }
                }
            }
        }
        totals
    }

    /// Total amount held, expressed in `unit` (a volume, mass, molar or
    /// activity unit).
    fn amount(&self, unit_symbol: &str, cfg: &UnitConfig) -> Result<f64> {
        let parsed = unit::parse_quantity(&format!("1 {unit_symbol}"))?;
        let container_amount = |container: &Container| match parsed.unit {
            unit::BaseUnit::Liter => container.get_volume(unit_symbol, cfg),
            unit::BaseUnit::Gram => container.get_mass(unit_symbol, cfg),
            unit::BaseUnit::Mole => container.get_moles(unit_symbol, cfg),
            unit::BaseUnit::Activity => Ok(container.get_activity()),
        };
        match self {
            Vessel::Container(container) => container_amount(container),
            Vessel::Plate(plate) => {
                let mut total = 0.0;
                for well in plate.wells() {
                    total += container_amount(well)?;
                }
                Ok(total)
            }
        }
    }
}

/// Names a vessel in a recipe step, optionally narrowed to a plate region.
///
/// The selector only applies when the named object is a plate; for a plate
/// without a selector the whole plate is meant.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub selector: Option<WellSelector>,
}

impl Target {
    pub fn container(name: &str) -> Target {
        Target {
            name: name.to_string(),
            selector: None,
        }
    }

    pub fn plate(name: &str, selector: WellSelector) -> Target {
        Target {
            name: name.to_string(),
            selector: Some(selector),
        }
    }
}

/// One symbolic bench operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateContainer {
        name: String,
        max_volume: Option<String>,
        initial_contents: Vec<(Substance, String)>,
    },
    Transfer {
        source: Target,
        destination: Target,
        quantity: String,
    },
    Solution {
        name: String,
        solutes: Vec<Substance>,
        solvent: Substance,
        spec: SolutionSpec,
    },
    SolutionFrom {
        name: String,
        solutes: Vec<Substance>,
        solvent: String,
        spec: SolutionSpec,
    },
    Remove {
        target: Target,
        what: RemoveTarget,
    },
    Dilute {
        target: String,
        solute: Substance,
        concentration: String,
        solvent: Substance,
    },
    FillTo {
        target: Target,
        solvent: Substance,
        quantity: String,
    },
}

/// A replayed step with snapshots of every vessel it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeStep {
    operation: Operation,
    before: Vec<Vessel>,
    after: Vec<Vessel>,
    /// Stored amounts destroyed by this step (`remove` only).
    trash: BTreeMap<Substance, f64>,
    /// One-line bench summary of the step.
    instructions: String,
}

impl RecipeStep {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn before(&self) -> &[Vessel] {
        &self.before
    }

    pub fn after(&self) -> &[Vessel] {
        &self.after
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Substances whose stored amount changed anywhere in this step.
    pub fn substances_used(&self) -> BTreeSet<Substance> {
        let mut used = BTreeSet::new();
        for (before, after) in self.before.iter().zip(&self.after) {
            let old = before.stored_totals();
            let new = after.stored_totals();
            for substance in old.keys().chain(new.keys()) {
                let delta = new.get(substance).copied().unwrap_or(0.0)
                    - old.get(substance).copied().unwrap_or(0.0);
                if delta != 0.0 {
                    used.insert(substance.clone());
                }
            }
        }
        used.extend(self.trash.keys().cloned());
        used
    }

    /// Change in stored amount of `substance` inside the vessel named `name`,
    /// or `None` when this step did not touch that vessel.
    fn delta_for(&self, name: &str, substance: &Substance) -> Option<f64> {
        let position = self.before.iter().position(|v| v.name() == name)?;
        Some(
            self.after[position].stored_amount(substance)
                - self.before[position].stored_amount(substance),
        )
    }

    fn touched(&self, name: &str) -> bool {
        self.before.iter().any(|v| v.name() == name)
    }
}

/// Which end of a stage a remaining-amount query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Before,
    After,
}

/// Inflow/outflow totals for one vessel over a stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flows {
    pub inflow: f64,
    pub outflow: f64,
}

/// The reserved stage covering every step.
const STAGE_ALL: &str = "all";

/// An ordered ledger of symbolic steps over named vessels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recipe {
    /// Declared starting states.
    objects: BTreeMap<String, Vessel>,
    /// Final states, populated by `bake`.
    results: BTreeMap<String, Vessel>,
    operations: Vec<Operation>,
    steps: Vec<RecipeStep>,
    /// Stage name to step index range, end exclusive.
    stages: Vec<(String, usize, usize)>,
    open_stage: Option<(String, usize)>,
    used: BTreeSet<String>,
    locked: bool,
}

impl Recipe {
    pub fn new() -> Recipe {
        Recipe::default()
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(UsageError::RecipeLocked.into());
        }
        Ok(())
    }

    fn check_known(&self, name: &str) -> Result<()> {
        if !self.objects.contains_key(name) {
            return Err(UsageError::UndeclaredObject(name.to_string()).into());
        }
        Ok(())
    }

    fn check_fresh(&self, name: &str) -> Result<()> {
        if self.objects.contains_key(name) {
            return Err(UsageError::DuplicateName(name.to_string()).into());
        }
        Ok(())
    }

    fn mark_used(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// Declares a vessel the recipe starts from. Its state at declaration
    /// time is the state the replay begins with.
    pub fn uses(&mut self, vessel: Vessel) -> Result<()> {
        self.check_unlocked()?;
        self.check_fresh(vessel.name())?;
        self.objects.insert(vessel.name().to_string(), vessel);
        Ok(())
    }

    /// Records creation of a fresh empty container.
    pub fn create_container(
        &mut self,
        name: &str,
        max_volume: Option<&str>,
        initial_contents: &[(Substance, &str)],
    ) -> Result<()> {
        self.check_unlocked()?;
        self.check_fresh(name)?;
        let operation = Operation::CreateContainer {
            name: name.to_string(),
            max_volume: max_volume.map(|v| v.to_string()),
            initial_contents: initial_contents
                .iter()
                .map(|(substance, quantity)| (substance.clone(), quantity.to_string()))
                .collect(),
        };
        // reserve the name so later steps can reference it
        self.objects.insert(
            name.to_string(),
            Vessel::Container(Container::pending(name)),
        );
        self.mark_used(name);
        self.operations.push(operation);
        Ok(())
    }

    /// Records a proportional transfer between two named vessels.
    pub fn transfer(&mut self, source: Target, destination: Target, quantity: &str) -> Result<()> {
        self.check_unlocked()?;
        self.check_known(&source.name)?;
        self.check_known(&destination.name)?;
        unit::parse_quantity(quantity)?;
        self.mark_used(&source.name.clone());
        self.mark_used(&destination.name.clone());
        self.operations.push(Operation::Transfer {
            source,
            destination,
            quantity: quantity.to_string(),
        });
        Ok(())
    }

    /// Records creation of a solution from a pure solvent.
    pub fn create_solution(
        &mut self,
        name: &str,
        solutes: &[Substance],
        solvent: &Substance,
        spec: &SolutionSpec,
    ) -> Result<()> {
        self.check_unlocked()?;
        self.check_fresh(name)?;
        self.objects.insert(
            name.to_string(),
            Vessel::Container(Container::pending(name)),
        );
        self.mark_used(name);
        self.operations.push(Operation::Solution {
            name: name.to_string(),
            solutes: solutes.to_vec(),
            solvent: solvent.clone(),
            spec: spec.clone(),
        });
        Ok(())
    }

    /// Records creation of a solution drawing its solvent from a declared
    /// stock container.
    pub fn create_solution_from(
        &mut self,
        name: &str,
        solutes: &[Substance],
        solvent: &str,
        spec: &SolutionSpec,
    ) -> Result<()> {
        self.check_unlocked()?;
        self.check_fresh(name)?;
        self.check_known(solvent)?;
        self.mark_used(solvent);
        self.objects.insert(
            name.to_string(),
            Vessel::Container(Container::pending(name)),
        );
        self.mark_used(name);
        self.operations.push(Operation::SolutionFrom {
            name: name.to_string(),
            solutes: solutes.to_vec(),
            solvent: solvent.to_string(),
            spec: spec.clone(),
        });
        Ok(())
    }

    /// Records removal of a kind or substance from a vessel.
    pub fn remove(&mut self, target: Target, what: RemoveTarget) -> Result<()> {
        self.check_unlocked()?;
        self.check_known(&target.name)?;
        self.mark_used(&target.name.clone());
        self.operations.push(Operation::Remove { target, what });
        Ok(())
    }

    /// Records dilution of a container to a target concentration.
    pub fn dilute(
        &mut self,
        target: &str,
        solute: &Substance,
        concentration: &str,
        solvent: &Substance,
    ) -> Result<()> {
        self.check_unlocked()?;
        self.check_known(target)?;
        self.mark_used(target);
        self.operations.push(Operation::Dilute {
            target: target.to_string(),
            solute: solute.clone(),
            concentration: concentration.to_string(),
            solvent: solvent.clone(),
        });
        Ok(())
    }

    /// Records topping a vessel up to a target quantity.
    pub fn fill_to(&mut self, target: Target, solvent: &Substance, quantity: &str) -> Result<()> {
        self.check_unlocked()?;
        self.check_known(&target.name)?;
        unit::parse_quantity(quantity)?;
        self.mark_used(&target.name.clone());
        self.operations.push(Operation::FillTo {
            target,
            solvent: solvent.clone(),
            quantity: quantity.to_string(),
        });
        Ok(())
    }

    /// Opens a named stage. Stages cannot nest and names cannot repeat.
    pub fn start_stage(&mut self, name: &str) -> Result<()> {
        self.check_unlocked()?;
        if name == STAGE_ALL {
            return Err(UsageError::Stage(format!("{STAGE_ALL:?} is reserved")).into());
        }
        if let Some((open, _)) = &self.open_stage {
            return Err(UsageError::Stage(format!("stage {open:?} is still open")).into());
        }
        if self.stages.iter().any(|(existing, _, _)| existing == name) {
            return Err(UsageError::Stage(format!("stage {name:?} already exists")).into());
        }
        self.open_stage = Some((name.to_string(), self.operations.len()));
        Ok(())
    }

    /// Closes the open stage.
    pub fn end_stage(&mut self) -> Result<()> {
        self.check_unlocked()?;
        match self.open_stage.take() {
            Some((name, start)) => {
                self.stages.push((name, start, self.operations.len()));
                Ok(())
            }
            None => Err(UsageError::Stage("no stage is open".to_string()).into()),
        }
    }

    /// Replays all recorded steps, locks the recipe, and returns the final
    /// vessel states.
    ///
    /// Any still-open stage is closed first. Declared objects that no step
    /// ever referenced make the bake fail, since they are almost always a
    /// sign of a mistyped name.
    pub fn bake(&mut self, cfg: &UnitConfig) -> Result<&BTreeMap<String, Vessel>> {
        self.check_unlocked()?;
        if self.open_stage.is_some() {
            self.end_stage()?;
        }

        let unused: Vec<String> = self
            .objects
            .keys()
            .filter(|name| !self.used.contains(*name))
            .cloned()
            .collect();
        if !unused.is_empty() {
            return Err(UsageError::UnusedObjects(unused).into());
        }

        let mut results: BTreeMap<String, Vessel> = self
            .objects
            .iter()
            .filter(|(name, _)| !self.is_created_by_step(name))
            .map(|(name, vessel)| (name.clone(), vessel.clone()))
            .collect();
        let mut steps = Vec::with_capacity(self.operations.len());
        for operation in &self.operations {
            steps.push(Recipe::apply(operation, &mut results, cfg)?);
        }

        self.steps = steps;
        self.results = results;
        self.locked = true;
        Ok(&self.results)
    }

    fn is_created_by_step(&self, name: &str) -> bool {
        self.operations.iter().any(|operation| match operation {
            Operation::CreateContainer { name: n, .. }
            | Operation::Solution { name: n, .. }
            | Operation::SolutionFrom { name: n, .. } => n == name,
            _ => false,
        })
    }

    fn fetch(results: &BTreeMap<String, Vessel>, name: &str) -> Result<Vessel> {
        results
            .get(name)
            .cloned()
            .ok_or_else(|| UsageError::UndeclaredObject(name.to_string()).into())
    }

    fn apply(
        operation: &Operation,
        results: &mut BTreeMap<String, Vessel>,
        cfg: &UnitConfig,
    ) -> Result<RecipeStep> {
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut trash = BTreeMap::new();

        match operation {
            Operation::CreateContainer {
                name,
                max_volume,
                initial_contents,
            } => {
                let contents: Vec<(Substance, &str)> = initial_contents
                    .iter()
                    .map(|(substance, quantity)| (substance.clone(), quantity.as_str()))
                    .collect();
                let container = Container::new(name, max_volume.as_deref(), &contents, cfg)?;
                after.push(Vessel::Container(container.clone()));
                before.push(Vessel::Container(Container::pending(name)));
                results.insert(name.clone(), Vessel::Container(container));
            }
            Operation::Transfer {
                source,
                destination,
                quantity,
            } => {
                let src = Recipe::fetch(results, &source.name)?;
                let dst = Recipe::fetch(results, &destination.name)?;
                before.push(src.clone());
                before.push(dst.clone());
                let (new_src, new_dst) = match (src, dst) {
                    (Vessel::Container(s), Vessel::Container(d)) => {
                        if source.name == destination.name {
                            // pouring a container into itself changes nothing
                            (Vessel::Container(s.clone()), Vessel::Container(s))
                        } else {
                            let (s, d) = Container::transfer(&s, &d, quantity, cfg)?;
                            (Vessel::Container(s), Vessel::Container(d))
                        }
                    }
                    (Vessel::Container(s), Vessel::Plate(d)) => {
                        let selector = destination.selector.clone().unwrap_or(WellSelector::All);
                        let (s, d) = d.transfer_in(&s, &selector, quantity, cfg)?;
                        (Vessel::Container(s), Vessel::Plate(d))
                    }
                    (Vessel::Plate(s), Vessel::Container(d)) => {
                        let selector = source.selector.clone().unwrap_or(WellSelector::All);
                        let (s, d) = s.transfer_out(&selector, &d, quantity, cfg)?;
                        (Vessel::Plate(s), Vessel::Container(d))
                    }
                    (Vessel::Plate(s), Vessel::Plate(d)) => {
                        let src_sel = source.selector.clone().unwrap_or(WellSelector::All);
                        let dst_sel = destination.selector.clone().unwrap_or(WellSelector::All);
                        let (s, d) = Plate::transfer_slice(&s, &src_sel, &d, &dst_sel, quantity, cfg)?;
                        (Vessel::Plate(s), Vessel::Plate(d))
                    }
                };
                if source.name == destination.name {
                    // same-plate move: one working copy, snapshot it once
                    before.pop();
                    after.push(new_dst.clone());
                    results.insert(destination.name.clone(), new_dst);
                } else {
                    after.push(new_src.clone());
                    after.push(new_dst.clone());
                    results.insert(source.name.clone(), new_src);
                    results.insert(destination.name.clone(), new_dst);
                }
            }
            Operation::Solution {
                name,
                solutes,
                solvent,
                spec,
            } => {
                let solution =
                    Container::create_solution(solutes, solvent, Some(name), spec, cfg)?;
                before.push(Vessel::Container(Container::pending(name)));
                after.push(Vessel::Container(solution.clone()));
                results.insert(name.clone(), Vessel::Container(solution));
            }
            Operation::SolutionFrom {
                name,
                solutes,
                solvent,
                spec,
            } => {
                let stock = match Recipe::fetch(results, solvent)? {
                    Vessel::Container(container) => container,
                    Vessel::Plate(_) => {
                        return Err(UsageError::UndeclaredObject(solvent.clone()).into())
                    }
                };
                before.push(Vessel::Container(Container::pending(name)));
                before.push(Vessel::Container(stock.clone()));
                let (remaining, solution) =
                    Container::create_solution_from(solutes, &stock, Some(name), spec, cfg)?;
                after.push(Vessel::Container(solution.clone()));
                after.push(Vessel::Container(remaining.clone()));
                results.insert(name.clone(), Vessel::Container(solution));
                results.insert(solvent.clone(), Vessel::Container(remaining));
            }
            Operation::Remove { target, what } => {
                let vessel = Recipe::fetch(results, &target.name)?;
                before.push(vessel.clone());
                let updated = match vessel {
                    Vessel::Container(container) => Vessel::Container(container.remove(what, cfg)?),
                    Vessel::Plate(plate) => {
                        let selector = target.selector.clone().unwrap_or(WellSelector::All);
                        Vessel::Plate(plate.remove(&selector, what, cfg)?)
                    }
                };
                let old = before[0].stored_totals();
                let new = updated.stored_totals();
                for (substance, amount) in old {
                    let kept = new.get(&substance).copied().unwrap_or(0.0);
                    if amount > kept {
                        *trash.entry(substance).or_insert(0.0) += amount - kept;
                    }
                }
                after.push(updated.clone());
                results.insert(target.name.clone(), updated);
            }
            Operation::Dilute {
                target,
                solute,
                concentration,
                solvent,
            } => {
                let container = match Recipe::fetch(results, target)? {
                    Vessel::Container(container) => container,
                    Vessel::Plate(_) => {
                        return Err(UsageError::UndeclaredObject(target.clone()).into())
                    }
                };
                before.push(Vessel::Container(container.clone()));
                let diluted = container.dilute(solute, concentration, solvent, None, cfg)?;
                after.push(Vessel::Container(diluted.clone()));
                results.insert(target.clone(), Vessel::Container(diluted));
            }
            Operation::FillTo {
                target,
                solvent,
                quantity,
            } => {
                let vessel = Recipe::fetch(results, &target.name)?;
                before.push(vessel.clone());
                let updated = match vessel {
                    Vessel::Container(container) => {
                        Vessel::Container(container.fill_to(solvent, quantity, cfg)?)
                    }
                    Vessel::Plate(plate) => {
                        let selector = target.selector.clone().unwrap_or(WellSelector::All);
                        Vessel::Plate(plate.fill_to(&selector, solvent, quantity, cfg)?)
                    }
                };
                after.push(updated.clone());
                results.insert(target.name.clone(), updated);
            }
        }

        let instructions = match operation {
            Operation::CreateContainer { name, .. } => format!("Create container {name:?}."),
            Operation::Transfer {
                source,
                destination,
                quantity,
            } => format!(
                "Transfer {} from {:?} to {:?}.",
                quantity, source.name, destination.name
            ),
            Operation::Solution { name, .. } => format!("Prepare solution {name:?}."),
            Operation::SolutionFrom { name, solvent, .. } => {
                format!("Prepare solution {name:?} from {solvent:?}.")
            }
            Operation::Remove { target, .. } => format!("Remove from {:?}.", target.name),
            Operation::Dilute {
                target,
                concentration,
                ..
            } => format!("Dilute {target:?} to {concentration}."),
            Operation::FillTo {
                target, quantity, ..
            } => format!("Fill {:?} to {}.", target.name, quantity),
        };

        Ok(RecipeStep {
            operation: operation.clone(),
            before,
            after,
            trash,
            instructions,
        })
    }

    pub fn is_baked(&self) -> bool {
        self.locked
    }

    /// Final vessel states. Empty until baked.
    pub fn results(&self) -> &BTreeMap<String, Vessel> {
        &self.results
    }

    /// Replayed steps. Empty until baked.
    pub fn steps(&self) -> &[RecipeStep] {
        &self.steps
    }

    /// Final state of one vessel by name.
    pub fn result(&self, name: &str) -> Result<&Vessel> {
        if !self.locked {
            return Err(UsageError::NotBaked.into());
        }
        self.results
            .get(name)
            .ok_or_else(|| UsageError::UndeclaredObject(name.to_string()).into())
    }

    /// Step index range of `stage`, end exclusive.
    fn stage_range(&self, stage: &str) -> Result<(usize, usize)> {
        if stage == STAGE_ALL {
            return Ok((0, self.steps.len()));
        }
        self.stages
            .iter()
            .find(|(name, _, _)| name == stage)
            .map(|(_, start, end)| (*start, *end))
            .ok_or_else(|| UsageError::UnknownStage(stage.to_string()).into())
    }

    fn check_baked(&self) -> Result<()> {
        if !self.locked {
            return Err(UsageError::NotBaked.into());
        }
        Ok(())
    }

    /// Net amount of `substance` that flowed into the named `destinations`
    /// over `stage`, expressed in `unit`. The pseudo-destination `"trash"`
    /// counts amounts destroyed by removal steps.
    pub fn get_substance_used(
        &self,
        substance: &Substance,
        stage: &str,
        unit_symbol: &str,
        destinations: &[&str],
        cfg: &UnitConfig,
    ) -> Result<f64> {
        self.check_baked()?;
        let (start, end) = self.stage_range(stage)?;
        let mut stored_total = 0.0;
        for step in &self.steps[start..end] {
            for destination in destinations {
                if *destination == "trash" {
                    stored_total += step.trash.get(substance).copied().unwrap_or(0.0);
                } else if let Some(delta) = step.delta_for(destination, substance) {
                    stored_total += delta;
                }
            }
        }
        let amount = unit::from_storage(substance, stored_total, unit_symbol, cfg)?;
        if amount < 0.0 {
            return Err(DomainError::NegativeFlow {
                substance: substance.name().to_string(),
                amount: -amount,
                unit: unit_symbol.to_string(),
            }
            .into());
        }
        Ok(amount)
    }

    /// Total inflow and outflow of the vessel named `name` over `stage`,
    /// expressed in `unit`. Each substance delta is converted separately, so
    /// mixed solids and liquids report sensible mass or volume totals.
    pub fn get_container_flows(
        &self,
        name: &str,
        stage: &str,
        unit_symbol: &str,
        cfg: &UnitConfig,
    ) -> Result<Flows> {
        self.check_baked()?;
        let (start, end) = self.stage_range(stage)?;
        let mut inflow = 0.0;
        let mut outflow = 0.0;
        for step in &self.steps[start..end] {
            let Some(position) = step.before.iter().position(|v| v.name() == name) else {
                continue;
            };
            let old = step.before[position].stored_totals();
            let new = step.after[position].stored_totals();
            let substances: BTreeSet<&Substance> = old.keys().chain(new.keys()).collect();
            for substance in substances {
                let delta = new.get(substance).copied().unwrap_or(0.0)
                    - old.get(substance).copied().unwrap_or(0.0);
                let converted = unit::from_storage(substance, delta.abs(), unit_symbol, cfg)?;
                if delta > 0.0 {
                    inflow += converted;
                } else {
                    outflow += converted;
                }
            }
        }
        Ok(Flows { inflow, outflow })
    }

    /// Amount held by the vessel named `name` at a boundary of `stage`,
    /// expressed in `unit`. With [`Mode::Before`] the state just before the
    /// stage first touches the vessel is used; with [`Mode::After`] the state
    /// after the stage last touches it. A vessel untouched by the stage
    /// reports its state entering the stage.
    pub fn get_amount_remaining(
        &self,
        name: &str,
        stage: &str,
        unit_symbol: &str,
        mode: Mode,
        cfg: &UnitConfig,
    ) -> Result<f64> {
        self.check_baked()?;
        self.check_known(name)?;
        let (start, end) = self.stage_range(stage)?;

        let snapshot = match mode {
            Mode::Before => self.steps[start..end]
                .iter()
                .find(|step| step.touched(name))
                .and_then(|step| step.before.iter().find(|v| v.name() == name).cloned()),
            Mode::After => self.steps[start..end]
                .iter()
                .rev()
                .find(|step| step.touched(name))
                .and_then(|step| step.after.iter().find(|v| v.name() == name).cloned()),
        };

        let vessel = match snapshot {
            Some(vessel) => vessel,
            // untouched during the stage: replay state entering the stage
            None => self.steps[..start]
                .iter()
                .rev()
                .find_map(|step| step.after.iter().find(|v| v.name() == name).cloned())
                .unwrap_or(Recipe::fetch(&self.objects, name)?),
        };
        vessel.amount(unit_symbol, cfg)
    }
}
