//! # Benchtop: Typed Modeling of Laboratory Liquid/Solid Handling
//!
//! A deterministic, immutable-value computation library for designing
//! bench-scale chemistry experiments: chemical [`Substance`]s, vessels
//! ([`Container`]) holding mixtures, rectangular arrays of vessels
//! ([`Plate`], e.g. 96-well microplates), and a declarative transformation
//! log ([`Recipe`]) that replays transfer/dilution/creation steps to produce
//! final vessel states and answer historical-flow queries.
//!
//! The core of the crate is its unit-conversion and quantity-arithmetic
//! engine: heterogeneous units (mass, volume, molar count, enzyme activity),
//! SI-prefix scaling, ratio-based proportional transfer between mixtures,
//! and dense linear solves for constructing solutions to target
//! concentrations.
//!
//! ## Example
//!
//! ```
//! use benchtop::{Container, Substance, UnitConfig};
//!
//! let cfg = UnitConfig::default();
//! let salt = Substance::solid("NaCl", 58.4428).unwrap();
//! let water = Substance::liquid("H2O", 18.0153, 1.0).unwrap();
//!
//! let salt_water = Container::new(
//!     "salt water",
//!     None,
//!     &[(salt.clone(), "50 mmol"), (water.clone(), "100 mL")],
//!     &cfg,
//! ).unwrap();
//!
//! let beaker = Container::new("beaker", Some("250 mL"), &[], &cfg).unwrap();
//! // Moving 10 mL carries salt and water in the same volumetric ratio.
//! let (rest, beaker) = Container::transfer(&salt_water, &beaker, "10 mL", &cfg).unwrap();
//! assert!(beaker.get_volume("mL", &cfg).unwrap() > 9.99);
//! assert!(rest.get_volume("mL", &cfg).unwrap() < salt_water.get_volume("mL", &cfg).unwrap());
//! ```
//!
//! ## Design
//!
//! - Every mutating-looking operation returns a *new* value; the receiver
//!   and argument vessels are never modified. A failed operation leaves all
//!   operands exactly as they were.
//! - All stored quantities live in a fixed internal storage scale (a
//!   configured volume unit and moles unit) and are rounded to a configured
//!   decimal precision after every operation so floating-point drift cannot
//!   compound across long step chains.
//! - There is no global configuration: a [`UnitConfig`] is passed by
//!   reference into every converting operation.

use std::collections::HashMap;

use thiserror::Error;

pub mod container;
pub mod plate;
pub mod recipe;
pub mod solver;
pub mod substance;
pub mod unit;

pub use container::{Container, RemoveTarget, SolutionSpec};
pub use plate::{Plate, WellSelector};
pub use recipe::{Flows, Mode, Operation, Recipe, RecipeStep, Target, Vessel};
pub use substance::{Kind, Substance};
pub use unit::{BaseUnit, Concentration, Quantity};

/// Result type for all fallible benchtop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by malformed quantity or concentration literals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The text does not match the `<float> <prefixed-unit>` grammar.
    #[error("invalid quantity: {0:?}")]
    InvalidQuantity(String),
    /// The numeric part parsed but is NaN or infinite.
    #[error("quantity value is not a finite number: {0:?}")]
    NonFiniteValue(String),
    /// The trailing letters do not resolve to an SI prefix plus base unit.
    #[error("invalid unit: {0:?}")]
    InvalidUnit(String),
    /// An SI prefix outside the supported table.
    #[error("invalid SI prefix: {0:?}")]
    InvalidPrefix(String),
    /// The text does not match any supported concentration form.
    #[error("invalid concentration: {0:?}")]
    InvalidConcentration(String),
}

/// Errors produced by physically impossible requests.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Transfer asked for more than the source holds.
    #[error("not enough mixture in {container}: {available} {unit} available, {needed} {unit} needed")]
    InsufficientQuantity {
        container: String,
        available: f64,
        needed: f64,
        unit: String,
    },
    /// An operation would push a container past its capacity.
    #[error("exceeded maximum volume in {0}")]
    ExceededCapacity(String),
    /// A ratio denominator (total mass/moles/activity) is zero.
    #[error("cannot transfer by {basis}: source {container} has zero total {basis}")]
    ZeroTotal { container: String, basis: &'static str },
    /// The solution system solved to non-positive or inconsistent amounts.
    #[error("solution is impossible to create")]
    ImpossibleSolution,
    /// The linear system for a solution was singular.
    #[error("solution system is singular")]
    SingularSystem,
    /// Dilution can only lower a concentration.
    #[error("desired concentration is higher than the current concentration")]
    CannotConcentrate,
    /// A required substance is absent from a container.
    #[error("container {container} does not contain {substance}")]
    MissingSubstance { container: String, substance: String },
    /// A quantity that must be positive was zero or negative.
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    /// A historical query summed to a negative flow.
    #[error("inconsistent query: destinations lost {amount} {unit} of {substance}")]
    NegativeFlow {
        substance: String,
        amount: f64,
        unit: String,
    },
}

/// Errors produced by API misuse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// A name that must be non-empty was empty.
    #[error("{0} must not be empty")]
    EmptyName(&'static str),
    /// `create_solution` needs exactly two of its three constraint groups.
    #[error("must specify exactly two of concentration, quantity, and total quantity")]
    WrongConstraintCount,
    /// Per-solute constraint lists must match the solute count.
    #[error("number of {0} values must match number of solutes")]
    ConstraintLengthMismatch(&'static str),
    /// Duplicate solutes in one solution request.
    #[error("solutes must be distinct: {0} repeats")]
    DuplicateSolute(String),
    /// Mutation attempted on a baked recipe.
    #[error("this recipe is locked")]
    RecipeLocked,
    /// Two used objects share a name.
    #[error("an object named {0:?} is already in use")]
    DuplicateName(String),
    /// A step references an object never declared via `uses`.
    #[error("{0:?} has not been declared for use")]
    UndeclaredObject(String),
    /// Declared objects that no step ever touched.
    #[error("declared objects were never used: {0:?}")]
    UnusedObjects(Vec<String>),
    /// Stage bookkeeping misuse.
    #[error("stage error: {0}")]
    Stage(String),
    /// Unknown stage name in a historical query.
    #[error("unknown stage {0:?}")]
    UnknownStage(String),
    /// A plate label that does not exist.
    #[error("unknown {axis} label {label:?}")]
    UnknownLabel { axis: &'static str, label: String },
    /// Source and destination regions with incompatible shapes.
    #[error("source and destination regions must be the same shape, one of them a single well, or both single wells")]
    ShapeMismatch,
    /// A physical constant that must be positive was not.
    #[error("{0} must be positive")]
    NonPositiveConstant(&'static str),
    /// Invalid plate geometry (labels, duplicates, numeric row names).
    #[error("invalid plate geometry: {0}")]
    PlateGeometry(String),
    /// A query was issued against a recipe that has not been baked.
    #[error("recipe must be baked before querying history")]
    NotBaked,
}

/// Top-level error type for the crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Usage(#[from] UsageError),
}

/// Injected unit/precision configuration.
///
/// Replaces the process-wide configuration file of classic plate-handling
/// tools with an explicit value passed by reference into every converting
/// operation, so the core stays testable under varied precision settings.
#[derive(Debug, Clone)]
pub struct UnitConfig {
    /// Decimal places every stored quantity is rounded to after each
    /// operation.
    pub internal_precision: u32,
    /// Storage unit for volumes, e.g. `"uL"`.
    pub volume_storage_unit: String,
    /// Storage unit for molar amounts, e.g. `"umol"`.
    pub moles_storage_unit: String,
    /// Default display unit for volumes.
    pub volume_display_unit: String,
    /// Default display unit for molar amounts.
    pub moles_display_unit: String,
    /// Density assumed for solids when estimating volumes (g/mL).
    pub default_solid_density: f64,
    /// Density assumed for enzymes when estimating volumes (g/mL).
    pub default_enzyme_density: f64,
    /// Unit pair substituted for `%w/v` concentrations, e.g. `("g", "mL")`.
    pub default_weight_volume_units: (String, String),
    /// Per-unit display precision table.
    pub precisions: HashMap<String, u32>,
    /// Display precision fallback for units missing from the table.
    pub default_precision: u32,
}

impl UnitConfig {
    /// Display precision for `unit`, falling back to the default.
    pub fn precision_for(&self, unit: &str) -> u32 {
        self.precisions
            .get(unit)
            .copied()
            .unwrap_or(self.default_precision)
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        let precisions = [
            ("uL", 1),
            ("mL", 3),
            ("L", 3),
            ("umol", 1),
            ("mmol", 3),
            ("mol", 3),
            ("g", 3),
            ("mg", 3),
            ("U", 1),
        ]
        .into_iter()
        .map(|(unit, digits)| (unit.to_string(), digits))
        .collect();

        UnitConfig {
            internal_precision: 12,
            volume_storage_unit: "uL".to_string(),
            moles_storage_unit: "umol".to_string(),
            volume_display_unit: "mL".to_string(),
            moles_display_unit: "mmol".to_string(),
            default_solid_density: 1.0,
            default_enzyme_density: 1.0,
            default_weight_volume_units: ("g".to_string(), "mL".to_string()),
            precisions,
            default_precision: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_storage_units() {
        let cfg = UnitConfig::default();
        assert_eq!(cfg.volume_storage_unit, "uL");
        assert_eq!(cfg.moles_storage_unit, "umol");
        assert_eq!(cfg.internal_precision, 12);
    }

    #[test]
    fn test_precision_lookup_falls_back() {
        let cfg = UnitConfig::default();
        assert_eq!(cfg.precision_for("uL"), 1);
        assert_eq!(cfg.precision_for("furlong"), cfg.default_precision);
    }

    #[test]
    fn test_error_conversion_into_top_level() {
        let err: Error = UsageError::RecipeLocked.into();
        assert!(matches!(err, Error::Usage(UsageError::RecipeLocked)));
    }
}
