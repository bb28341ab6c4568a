//! Unit parsing and dimensional conversion.
//!
//! Quantities move through the crate in four base dimensions: mass (`g`),
//! volume (`L`), molar amount (`mol`), and enzyme activity (`U`). Literal
//! quantities and concentrations are parsed from short strings such as
//! `"10 mL"` or `"0.5 M"`; conversions between dimensions go through a
//! substance's physical constants (molecular weight, density, specific
//! activity).
//!
//! Two policies keep heterogeneous sums well defined:
//!
//! - **Zero contribution**: converting to or from `U` for a non-enzyme, or to
//!   `mol` for an enzyme, yields `0.0` instead of an error, so summing "total
//!   moles" or "total activity" over a mixed container just works.
//! - **Storage scale**: containers store solids and liquids in the configured
//!   moles storage unit and enzymes in raw `U`; [`from_storage`] dispatches on
//!   the substance kind so both paths share one conversion table.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::substance::{Kind, Substance};
use crate::{DomainError, FormatError, Result, UnitConfig};

/// One of the four base dimensions a quantity can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseUnit {
    Gram,
    Liter,
    Mole,
    Activity,
}

impl BaseUnit {
    /// Canonical unit symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            BaseUnit::Gram => "g",
            BaseUnit::Liter => "L",
            BaseUnit::Mole => "mol",
            BaseUnit::Activity => "U",
        }
    }
}

impl fmt::Display for BaseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A parsed quantity, already scaled to its base unit.
///
/// `"10 mL"` parses to `Quantity { value: 0.01, unit: Liter }`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: BaseUnit,
}

/// A parsed concentration in base units, e.g. mol per L.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Concentration {
    pub value: f64,
    pub numerator: BaseUnit,
    pub denominator: BaseUnit,
}

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-zµ]+)\s*$").unwrap()
});

// Denominator of a concentration: the leading value is optional so both
// "mL" and the compressed "10 uL" forms match.
static DENOMINATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s+)?([A-Za-zµ]+)\s*$").unwrap()
});

/// Converts an SI prefix into a multiplier, e.g. `"m"` to `1e-3`.
pub fn prefix_multiplier(prefix: &str) -> Result<f64> {
    match prefix {
        "n" => Ok(1e-9),
        "u" | "µ" => Ok(1e-6),
        "m" => Ok(1e-3),
        "c" => Ok(1e-2),
        "d" => Ok(1e-1),
        "" => Ok(1.0),
        "da" => Ok(1e1),
        "k" => Ok(1e3),
        "M" => Ok(1e6),
        other => Err(FormatError::InvalidPrefix(other.to_string()).into()),
    }
}

/// Splits a prefixed unit string into its multiplier and base dimension.
///
/// `U` takes no prefix.
fn parse_unit(unit: &str) -> Result<(f64, BaseUnit)> {
    if unit == "U" {
        return Ok((1.0, BaseUnit::Activity));
    }
    for (suffix, base) in [
        ("mol", BaseUnit::Mole),
        ("g", BaseUnit::Gram),
        ("L", BaseUnit::Liter),
    ] {
        if let Some(prefix) = unit.strip_suffix(suffix) {
            return Ok((prefix_multiplier(prefix)?, base));
        }
    }
    Err(FormatError::InvalidUnit(unit.to_string()).into())
}

/// Parses `"<float> <prefixed-unit>"` into a base-unit [`Quantity`].
pub fn parse_quantity(text: &str) -> Result<Quantity> {
    let caps = QUANTITY_RE
        .captures(text)
        .ok_or_else(|| FormatError::InvalidQuantity(text.to_string()))?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| FormatError::InvalidQuantity(text.to_string()))?;
    if !value.is_finite() {
        return Err(FormatError::NonFiniteValue(text.to_string()).into());
    }
    let (multiplier, unit) = parse_unit(&caps[2])?;
    let scaled = value * multiplier;
    if !scaled.is_finite() {
        return Err(FormatError::NonFiniteValue(text.to_string()).into());
    }
    Ok(Quantity {
        value: scaled,
        unit,
    })
}

/// Parses a concentration literal into base units.
///
/// Accepted forms: molar `"0.5 M"` (mol/L), molal `"0.1 m"` (mol/kg), the
/// percent forms `%v/v`, `%w/w`, `%w/v` (the last substitutes the configured
/// unit pair), and explicit ratios like `"5 umol/mL"` or the compressed
/// `"0.1 umol/10 uL"`. `U` is legal only in the numerator.
pub fn parse_concentration(text: &str, cfg: &UnitConfig) -> Result<Concentration> {
    let trimmed = text.trim();
    let mut s = if trimmed.contains('/') {
        trimmed.to_string()
    } else if let Some(head) = trimmed.strip_suffix('M') {
        format!("{head}mol/L")
    } else if let Some(head) = trimmed.strip_suffix('m') {
        format!("{head}mol/kg")
    } else {
        return Err(FormatError::InvalidConcentration(text.to_string()).into());
    };

    let mut percent = false;
    let weight_volume = format!(
        "{}/{}",
        cfg.default_weight_volume_units.0, cfg.default_weight_volume_units.1
    );
    for (suffix, replacement) in [
        ("%v/v", "L/L"),
        ("%w/w", "g/g"),
        ("%w/v", weight_volume.as_str()),
    ] {
        if let Some(head) = s.strip_suffix(suffix) {
            s = format!("{head}{replacement}");
            percent = true;
            break;
        }
    }

    let (num_str, den_str) = s
        .split_once('/')
        .ok_or_else(|| FormatError::InvalidConcentration(text.to_string()))?;

    let num_caps = QUANTITY_RE
        .captures(num_str)
        .ok_or_else(|| FormatError::InvalidConcentration(text.to_string()))?;
    let mut value: f64 = num_caps[1]
        .parse()
        .map_err(|_| FormatError::InvalidConcentration(text.to_string()))?;

    let den_caps = DENOMINATOR_RE
        .captures(den_str)
        .ok_or_else(|| FormatError::InvalidConcentration(text.to_string()))?;
    if let Some(den_value) = den_caps.get(1) {
        let divisor: f64 = den_value
            .as_str()
            .parse()
            .map_err(|_| FormatError::InvalidConcentration(text.to_string()))?;
        value /= divisor;
    }
    if percent {
        value /= 100.0;
    }

    let (num_mult, numerator) = parse_unit(&num_caps[2])?;
    let (den_mult, denominator) = parse_unit(&den_caps[2])?;
    if denominator == BaseUnit::Activity {
        return Err(FormatError::InvalidConcentration(text.to_string()).into());
    }
    value = value * num_mult / den_mult;
    if !value.is_finite() {
        return Err(FormatError::NonFiniteValue(text.to_string()).into());
    }
    Ok(Concentration {
        value: round_to(value, cfg.internal_precision),
        numerator,
        denominator,
    })
}

fn mol_weight_of(substance: &Substance) -> Result<f64> {
    substance
        .mol_weight()
        .ok_or_else(|| DomainError::NonPositive("molecular weight").into())
}

fn specific_activity_of(substance: &Substance) -> Result<f64> {
    substance
        .specific_activity()
        .ok_or_else(|| DomainError::NonPositive("specific activity").into())
}

fn density_of(substance: &Substance, cfg: &UnitConfig) -> Result<f64> {
    let density = substance.effective_density(cfg);
    if density > 0.0 {
        Ok(density)
    } else {
        Err(DomainError::NonPositive("density").into())
    }
}

/// Converts a quantity of `substance` between prefixed units.
///
/// Both unit strings may carry SI prefixes. Mass and moles relate through the
/// molecular weight, mass and volume through the density (solids and enzymes
/// use the configured defaults), and `U` and mass through the specific
/// activity. Conversions excluded by the zero-contribution policy return
/// `0.0`.
pub fn convert_from(
    substance: &Substance,
    quantity: f64,
    from_unit: &str,
    to_unit: &str,
    cfg: &UnitConfig,
) -> Result<f64> {
    use BaseUnit::*;

    let (from_mult, from) = parse_unit(from_unit)?;
    let (to_mult, to) = parse_unit(to_unit)?;

    if (from == Activity || to == Activity) && !substance.is_enzyme() {
        return Ok(0.0);
    }
    if substance.is_enzyme() && (from == Mole || to == Mole) {
        return Ok(0.0);
    }

    let base = quantity * from_mult;
    let result = match (from, to) {
        (Gram, Gram) | (Liter, Liter) | (Mole, Mole) | (Activity, Activity) => base,
        // mass and volume through density, in mL then to L
        (Gram, Liter) => base / density_of(substance, cfg)? / 1000.0,
        (Liter, Gram) => base * 1000.0 * density_of(substance, cfg)?,
        // mass and moles through molecular weight
        (Gram, Mole) => base / mol_weight_of(substance)?,
        (Mole, Gram) => base * mol_weight_of(substance)?,
        // moles and volume composed through both constants
        (Mole, Liter) => base * mol_weight_of(substance)? / density_of(substance, cfg)? / 1000.0,
        (Liter, Mole) => base * 1000.0 * density_of(substance, cfg)? / mol_weight_of(substance)?,
        // activity and mass/volume through specific activity (enzymes only
        // reach here)
        (Activity, Gram) => base / specific_activity_of(substance)?,
        (Gram, Activity) => base * specific_activity_of(substance)?,
        (Activity, Liter) => {
            base / specific_activity_of(substance)? / density_of(substance, cfg)? / 1000.0
        }
        (Liter, Activity) => {
            base * 1000.0 * density_of(substance, cfg)? * specific_activity_of(substance)?
        }
        // excluded above by the zero-contribution policy
        (Mole, Activity) | (Activity, Mole) => 0.0,
    };
    Ok(result / to_mult)
}

/// Parses `quantity` and converts it to `to_unit`.
pub fn convert(
    substance: &Substance,
    quantity: &str,
    to_unit: &str,
    cfg: &UnitConfig,
) -> Result<f64> {
    let parsed = parse_quantity(quantity)?;
    convert_from(substance, parsed.value, parsed.unit.symbol(), to_unit, cfg)
}

fn storage_multiplier(storage_unit: &str) -> Result<f64> {
    let (multiplier, _) = parse_unit(storage_unit)?;
    Ok(multiplier)
}

/// Converts a prefixed volume or mole value into the storage scale.
///
/// `(1.0, "L")` becomes `1e6` when the volume storage unit is `uL`. `U`
/// passes through unscaled.
pub fn convert_to_storage(value: f64, unit: &str, cfg: &UnitConfig) -> Result<f64> {
    if unit == "U" {
        return Ok(round_to(value, cfg.internal_precision));
    }
    let (multiplier, base) = parse_unit(unit)?;
    let storage = match base {
        BaseUnit::Liter => storage_multiplier(&cfg.volume_storage_unit)?,
        BaseUnit::Mole => storage_multiplier(&cfg.moles_storage_unit)?,
        BaseUnit::Gram | BaseUnit::Activity => {
            return Err(FormatError::InvalidUnit(unit.to_string()).into())
        }
    };
    Ok(round_to(value * multiplier / storage, cfg.internal_precision))
}

/// Converts a storage-scale value back into a prefixed volume or mole unit.
pub fn convert_from_storage(value: f64, unit: &str, cfg: &UnitConfig) -> Result<f64> {
    if unit == "U" {
        return Ok(round_to(value, cfg.internal_precision));
    }
    let (multiplier, base) = parse_unit(unit)?;
    let storage = match base {
        BaseUnit::Liter => storage_multiplier(&cfg.volume_storage_unit)?,
        BaseUnit::Mole => storage_multiplier(&cfg.moles_storage_unit)?,
        BaseUnit::Gram | BaseUnit::Activity => {
            return Err(FormatError::InvalidUnit(unit.to_string()).into())
        }
    };
    Ok(round_to(value * storage / multiplier, cfg.internal_precision))
}

/// Converts a stored amount of `substance` to any unit.
///
/// Solids and liquids are stored in the moles storage unit, enzymes in raw
/// `U`; this is the single entry point container code uses to read contents
/// back out.
pub fn from_storage(substance: &Substance, amount: f64, to_unit: &str, cfg: &UnitConfig) -> Result<f64> {
    if substance.is_enzyme() {
        return convert_from(substance, amount, "U", to_unit, cfg);
    }
    let moles = convert_from_storage(amount, "mol", cfg)?;
    convert_from(substance, moles, "mol", to_unit, cfg)
}

/// Converts a stored amount to the substance's natural display form:
/// grams for solids, liters for liquids, `U` for enzymes, scaled to a
/// human-readable prefix.
pub fn to_standard_format(
    substance: &Substance,
    stored: f64,
    cfg: &UnitConfig,
) -> Result<(f64, String)> {
    let (value, unit) = match substance.kind() {
        Kind::Solid => (from_storage(substance, stored, "g", cfg)?, "g"),
        Kind::Liquid => (from_storage(substance, stored, "L", cfg)?, "L"),
        Kind::Enzyme => (stored, "U"),
    };
    let (value, unit) = get_human_readable_unit(value, unit);
    Ok((round_to(value, cfg.internal_precision), unit))
}

/// Rescales a base-unit value to the SI prefix that puts its magnitude in
/// `[1, 1000)`. Zero passes through unchanged; `U` is never prefixed.
pub fn get_human_readable_unit(value: f64, unit: &str) -> (f64, String) {
    if value == 0.0 {
        return (0.0, unit.to_string());
    }
    let base = if unit == "U" {
        return (value, "U".to_string());
    } else if unit.ends_with("mol") {
        "mol"
    } else if unit.ends_with('L') {
        "L"
    } else {
        "g"
    };
    let magnitude = value.abs();
    let prefixes = [
        (1e6, "M"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "u"),
    ];
    for (multiplier, prefix) in prefixes {
        if magnitude >= multiplier {
            return (value / multiplier, format!("{prefix}{base}"));
        }
    }
    (value / 1e-9, format!("n{base}"))
}

/// Solute-to-solvent mole ratio implied by a concentration target.
///
/// Used by dilution to compare the current mixture against a target without
/// materializing intermediate volumes. Returns the ratio together with the
/// parsed numerator and denominator dimensions.
pub fn concentration_ratio(
    solute: &Substance,
    concentration: &str,
    solvent: &Substance,
    cfg: &UnitConfig,
) -> Result<(f64, BaseUnit, BaseUnit)> {
    use BaseUnit::*;

    let parsed = parse_concentration(concentration, cfg)?;
    let mut c = parsed.value;
    if parsed.numerator == Activity {
        return Err(FormatError::InvalidConcentration(concentration.to_string()).into());
    }

    let mw_solute = mol_weight_of(solute)?;
    let mw_solvent = mol_weight_of(solvent)?;

    let ratio = match (parsed.numerator, parsed.denominator) {
        (Gram, Gram) => c * mw_solvent / (1.0 - c) / mw_solute,
        (Gram, Mole) => c / (mw_solute - c),
        (Gram, Liter) => {
            c /= 1000.0; // g/mL
            let d_solute = density_of(solute, cfg)?;
            let d_solvent = density_of(solvent, cfg)?;
            c * mw_solvent / (mw_solute * d_solvent * (1.0 - c / d_solute))
        }
        (Liter, Gram) => {
            c *= 1000.0; // mL/g
            let d_solute = density_of(solute, cfg)?;
            c * mw_solvent / (mw_solute * (1.0 / d_solute - c))
        }
        (Liter, Mole) => {
            c *= 1000.0; // mL/mol
            let d_solute = density_of(solute, cfg)?;
            c / (mw_solute / d_solute - c)
        }
        (Liter, Liter) => {
            let d_solute = density_of(solute, cfg)?;
            let d_solvent = density_of(solvent, cfg)?;
            c * mw_solvent / d_solvent / (mw_solute / d_solute) / (1.0 - c)
        }
        (Mole, Gram) => c * mw_solvent / (1.0 - c * mw_solute),
        (Mole, Mole) => c / (1.0 - c),
        (Mole, Liter) => {
            c /= 1000.0; // mol/mL
            let d_solute = density_of(solute, cfg)?;
            let d_solvent = density_of(solvent, cfg)?;
            c * mw_solvent / d_solvent / (1.0 - c * mw_solute / d_solute)
        }
        (Activity, _) | (_, Activity) => unreachable!("rejected above"),
    };
    if !ratio.is_finite() {
        return Err(DomainError::ImpossibleSolution.into());
    }
    Ok((ratio, parsed.numerator, parsed.denominator))
}

/// Rounds to `digits` decimal places, normalizing `-0.0` to `0.0`.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
