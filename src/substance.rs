//! Immutable chemical and biological entities.
//!
//! A [`Substance`] describes a reagent, solvent, or enzyme together with the
//! physical constants the unit-conversion engine needs: molecular weight
//! (g/mol), density (g/mL), and specific activity (U/g). Substances are pure
//! values: created once through a factory, never mutated, and compared,
//! hashed, and ordered by their full constant set so they can key content
//! maps.
//!
//! # Example
//!
//! ```
//! use benchtop::Substance;
//!
//! let salt = Substance::solid("NaCl", 58.4428).unwrap();
//! let water = Substance::liquid("H2O", 18.0153, 1.0).unwrap();
//! let lipase = Substance::enzyme("lipase", 10_000.0).unwrap();
//!
//! assert!(salt.is_solid());
//! assert!(water.concentration().unwrap() > 0.0);
//! assert!(lipase.is_enzyme());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{DomainError, Result, UnitConfig, UsageError};

/// Physical classification of a substance.
///
/// Solids and enzymes have no intrinsic density; volume estimates for them
/// fall back to the configured defaults in [`UnitConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Solid,
    Liquid,
    Enzyme,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Solid => write!(f, "solid"),
            Kind::Liquid => write!(f, "liquid"),
            Kind::Enzyme => write!(f, "enzyme"),
        }
    }
}

/// An immutable chemical or biological entity.
///
/// Exactly one constant set is meaningful per kind: molecular weight for
/// solids, molecular weight plus density for liquids, and specific activity
/// for enzymes. Unset constants are stored as NaN and never read on valid
/// paths.
#[derive(Debug, Clone)]
pub struct Substance {
    name: String,
    kind: Kind,
    mol_weight: f64,
    density: f64,
    specific_activity: f64,
    /// Cached mol/mL for liquids.
    concentration: f64,
}

impl Substance {
    /// Creates a solid with a molecular weight in g/mol.
    pub fn solid(name: &str, mol_weight: f64) -> Result<Substance> {
        if name.is_empty() {
            return Err(UsageError::EmptyName("substance name").into());
        }
        if !(mol_weight > 0.0) {
            return Err(DomainError::NonPositive("molecular weight").into());
        }
        Ok(Substance {
            name: name.to_string(),
            kind: Kind::Solid,
            mol_weight,
            density: f64::NAN,
            specific_activity: f64::NAN,
            concentration: f64::NAN,
        })
    }

    /// Creates a liquid with a molecular weight in g/mol and a density in
    /// g/mL.
    pub fn liquid(name: &str, mol_weight: f64, density: f64) -> Result<Substance> {
        if name.is_empty() {
            return Err(UsageError::EmptyName("substance name").into());
        }
        if !(mol_weight > 0.0) {
            return Err(DomainError::NonPositive("molecular weight").into());
        }
        if !(density > 0.0) {
            return Err(DomainError::NonPositive("density").into());
        }
        Ok(Substance {
            name: name.to_string(),
            kind: Kind::Liquid,
            mol_weight,
            density,
            specific_activity: f64::NAN,
            concentration: density / mol_weight,
        })
    }

    /// Creates an enzyme with a specific activity in U/g.
    pub fn enzyme(name: &str, specific_activity: f64) -> Result<Substance> {
        if name.is_empty() {
            return Err(UsageError::EmptyName("substance name").into());
        }
        if !(specific_activity > 0.0) {
            return Err(DomainError::NonPositive("specific activity").into());
        }
        Ok(Substance {
            name: name.to_string(),
            kind: Kind::Enzyme,
            mol_weight: f64::NAN,
            density: f64::NAN,
            specific_activity,
            concentration: f64::NAN,
        })
    }

    /// The substance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical classification.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_solid(&self) -> bool {
        self.kind == Kind::Solid
    }

    pub fn is_liquid(&self) -> bool {
        self.kind == Kind::Liquid
    }

    pub fn is_enzyme(&self) -> bool {
        self.kind == Kind::Enzyme
    }

    /// Molecular weight in g/mol. `None` for enzymes.
    pub fn mol_weight(&self) -> Option<f64> {
        if self.mol_weight.is_nan() {
            None
        } else {
            Some(self.mol_weight)
        }
    }

    /// Intrinsic density in g/mL. `None` for solids and enzymes.
    pub fn density(&self) -> Option<f64> {
        if self.density.is_nan() {
            None
        } else {
            Some(self.density)
        }
    }

    /// Specific activity in U/g. `None` for non-enzymes.
    pub fn specific_activity(&self) -> Option<f64> {
        if self.specific_activity.is_nan() {
            None
        } else {
            Some(self.specific_activity)
        }
    }

    /// Cached molar concentration in mol/mL. `None` for non-liquids.
    pub fn concentration(&self) -> Option<f64> {
        if self.concentration.is_nan() {
            None
        } else {
            Some(self.concentration)
        }
    }

    /// Density used for volume estimates: intrinsic for liquids, the
    /// configured default otherwise.
    pub fn effective_density(&self, cfg: &UnitConfig) -> f64 {
        match self.kind {
            Kind::Liquid => self.density,
            Kind::Solid => cfg.default_solid_density,
            Kind::Enzyme => cfg.default_enzyme_density,
        }
    }
}

impl fmt::Display for Substance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Solid => write!(f, "SOLID ({}: {})", self.name, self.mol_weight),
            Kind::Liquid => write!(
                f,
                "LIQUID ({}: {}, {})",
                self.name, self.mol_weight, self.density
            ),
            Kind::Enzyme => write!(f, "ENZYME ({}: {} U/g)", self.name, self.specific_activity),
        }
    }
}

// Identity is value equality over (name, kind, constants). NaN-unset fields
// compare through their bit patterns so equality, hashing, and ordering stay
// consistent and substances can key BTreeMaps.
impl PartialEq for Substance {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.mol_weight.to_bits() == other.mol_weight.to_bits()
            && self.density.to_bits() == other.density.to_bits()
            && self.specific_activity.to_bits() == other.specific_activity.to_bits()
    }
}

impl Eq for Substance {}

impl Hash for Substance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
        self.mol_weight.to_bits().hash(state);
        self.density.to_bits().hash(state);
        self.specific_activity.to_bits().hash(state);
    }
}

impl PartialOrd for Substance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Substance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.kind.cmp(&other.kind))
            .then(self.mol_weight.total_cmp(&other.mol_weight))
            .then(self.density.total_cmp(&other.density))
            .then(self.specific_activity.total_cmp(&other.specific_activity))
    }
}
